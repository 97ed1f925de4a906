//! Integration tests for search consistency.
//!
//! These tests drive mutations through the HTTP handlers and observe the
//! search side through the search service, the way clients see it.

mod common;

use axum::Json;
use axum::extract::{Path, State};
use rstest::rstest;

use common::{admin, create_task_as, create_task_with_description, create_test_context, user};
use task_search_api::api::dto::UpdateTaskRequest;
use task_search_api::api::{delete_task, update_task};
use task_search_api::domain::SearchDocument;
use task_search_api::infrastructure::{SearchIndex, TaskRepository};
use task_search_api::search::{IndexMutator, IndexWriteResult, RetryPolicy, SearchError};

// =============================================================================
// Visibility
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_created_task_is_searchable_by_title_token() {
    let context = create_test_context();
    let owner = user();
    let created = create_task_as(&context, &owner, "Quarterly report draft").await;
    context.flush().await;

    let results = context
        .state
        .search_service
        .search("quarterly", &owner)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, created.id);
    assert_eq!(results[0].title, "Quarterly report draft");
}

#[rstest]
#[tokio::test]
async fn test_search_matches_word_prefix_of_last_token() {
    let context = create_test_context();
    let owner = user();
    create_task_as(&context, &owner, "Quarterly report draft").await;
    context.flush().await;

    let results = context
        .state
        .search_service
        .search("report dra", &owner)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
}

#[rstest]
#[tokio::test]
async fn test_search_is_scoped_to_owner() {
    let context = create_test_context();
    let alice = user();
    let bob = user();
    let own = create_task_as(&context, &alice, "Buy milk").await;
    create_task_as(&context, &bob, "Buy milk").await;
    context.flush().await;

    let alice_results = context
        .state
        .search_service
        .search("milk", &alice)
        .await
        .unwrap();
    let admin_results = context
        .state
        .search_service
        .search("milk", &admin())
        .await
        .unwrap();

    assert_eq!(alice_results.len(), 1);
    assert_eq!(alice_results[0].id, own.id);
    assert_eq!(alice_results[0].user_id, alice.user_id);
    assert_eq!(admin_results.len(), 2);
}

#[rstest]
#[tokio::test]
async fn test_deleted_task_disappears_from_search() {
    let context = create_test_context();
    let owner = user();
    let created = create_task_as(&context, &owner, "Renew passport").await;
    context.flush().await;

    delete_task(
        State(context.state.clone()),
        owner.clone(),
        Path(created.id.to_string()),
    )
    .await
    .unwrap();
    context.flush().await;

    let results = context
        .state
        .search_service
        .search("passport", &owner)
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(context.index.get(&created.id).await, None);
}

#[rstest]
#[tokio::test]
async fn test_title_update_is_reflected() {
    let context = create_test_context();
    let owner = user();
    let created = create_task_as(&context, &owner, "Call plumber").await;
    context.flush().await;

    update_task(
        State(context.state.clone()),
        owner.clone(),
        Path(created.id.to_string()),
        Json(UpdateTaskRequest {
            title: Some("Call electrician".to_string()),
            ..UpdateTaskRequest::default()
        }),
    )
    .await
    .unwrap();
    context.flush().await;

    let search = &context.state.search_service;
    assert!(search.search("plumber", &owner).await.unwrap().is_empty());
    let results = search.search("electrician", &owner).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title, "Call electrician");
}

#[rstest]
#[tokio::test]
async fn test_title_matches_rank_above_description_matches() {
    let context = create_test_context();
    let owner = user();
    create_task_with_description(&context, &owner, "Groceries", "milk and eggs").await;
    let titled = create_task_as(&context, &owner, "Milk run").await;
    context.flush().await;

    let results = context
        .state
        .search_service
        .search("milk", &owner)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, titled.id);
}

// =============================================================================
// Query Validation and Failures
// =============================================================================

#[rstest]
#[case("")]
#[case("   ")]
#[case("\t\n")]
#[tokio::test]
async fn test_blank_query_is_rejected_without_touching_index(#[case] query: &str) {
    let context = create_test_context();

    let result = context.state.search_service.search(query, &user()).await;

    assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    assert_eq!(context.flaky.calls().searches, 0);
}

#[rstest]
#[tokio::test]
async fn test_no_match_is_empty_success_but_outage_is_error() {
    let context = create_test_context();
    let owner = user();
    create_task_as(&context, &owner, "Buy milk").await;
    context.flush().await;

    let empty = context
        .state
        .search_service
        .search("zzz-no-match", &owner)
        .await;
    context.flaky.set_unavailable(true);
    let outage = context
        .state
        .search_service
        .search("zzz-no-match", &owner)
        .await;

    assert_eq!(empty, Ok(Vec::new()));
    assert!(matches!(outage, Err(SearchError::SearchUnavailable(_))));
}

// =============================================================================
// Index Write Isolation
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_index_outage_does_not_fail_writes_and_is_repaired() {
    let context = create_test_context();
    let owner = user();
    context.flaky.set_writes_failing(true);

    let created = create_task_as(&context, &owner, "Water plants").await;
    context.flush().await;

    assert!(context.repository.find_by_id(&created.id).await.unwrap().is_some());
    assert_eq!(context.index.get(&created.id).await, None);
    assert!(context.repair_queue.contains(&created.id).await);

    context.flaky.set_writes_failing(false);
    let report = context.state.reconciler.reconcile().await.unwrap();
    let results = context
        .state
        .search_service
        .search("plants", &owner)
        .await
        .unwrap();

    assert_eq!(report.repaired_upserts, 1);
    assert_eq!(results.len(), 1);
    assert!(!context.repair_queue.contains(&created.id).await);
}

#[rstest]
#[tokio::test]
async fn test_upsert_is_idempotent() {
    let context = create_test_context();
    let owner = user();
    let created = create_task_as(&context, &owner, "Idempotent").await;
    context.flush().await;
    let task = context
        .repository
        .find_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    let mutator = IndexMutator::new(
        context.flaky.clone(),
        context.repair_queue.clone(),
        RetryPolicy::default(),
    );

    let first = mutator.upsert(&task).await;
    let second = mutator.upsert(&task).await;

    assert_eq!(first, IndexWriteResult::Written);
    assert_eq!(second, IndexWriteResult::Written);
    assert_eq!(context.index.count().await.unwrap(), 1);
    assert_eq!(
        context.index.get(&created.id).await,
        Some(SearchDocument::from(&task))
    );
}
