//! HTTP-level tests through the full router.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{TestContext, admin, create_task_as, create_test_context, user};
use task_search_api::api::router;
use task_search_api::domain::Requester;

// =============================================================================
// Helpers
// =============================================================================

fn app(context: &TestContext) -> Router {
    router(context.state.clone())
}

async fn send(
    context: &TestContext,
    method: Method,
    uri: &str,
    requester: Option<&Requester>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(requester) = requester {
        builder = builder.header(header::AUTHORIZATION, context.bearer(requester));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app(context).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// =============================================================================
// Health and Authentication
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_health_check() {
    let context = create_test_context();

    let (status, body) = send(&context, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[rstest]
#[case("/api/v1/tasks/getTasks")]
#[case("/search?query=milk")]
#[case("/api/v1/tasks/search?query=milk")]
#[tokio::test]
async fn test_missing_token_is_rejected(#[case] uri: &str) {
    let context = create_test_context();

    let (status, body) = send(&context, Method::GET, uri, None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Token Missing");
}

#[rstest]
#[tokio::test]
async fn test_token_cookie_is_accepted() {
    let context = create_test_context();
    let bearer = context.bearer(&user());
    let token = bearer.trim_start_matches("Bearer ");
    let request = Request::builder()
        .uri("/api/v1/tasks/getTasks")
        .header(header::COOKIE, format!("token={token}"))
        .body(Body::empty())
        .unwrap();

    let response = app(&context).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[rstest]
#[tokio::test]
async fn test_admin_route_rejects_regular_account() {
    let context = create_test_context();

    let (status, body) = send(
        &context,
        Method::GET,
        "/api/v1/tasks/admin/getAllTasksForAdmin",
        Some(&user()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "This is a protected route for admin only.");
}

// =============================================================================
// Task CRUD
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_create_then_get_single_task() {
    let context = create_test_context();
    let owner = user();

    let (status, created) = send(
        &context,
        Method::POST,
        "/api/v1/tasks/createTask",
        Some(&owner),
        Some(json!({ "title": "Buy milk", "dueDate": "2026-11-01" })),
    )
    .await;
    let id = created["task"]["id"].as_str().unwrap().to_string();
    let (status_get, fetched) = send(
        &context,
        Method::GET,
        &format!("/api/v1/tasks/getSingleTask/{id}"),
        Some(&owner),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["success"], true);
    assert_eq!(created["task"]["userId"], owner.user_id.to_string());
    assert_eq!(created["task"]["dueDate"], "2026-11-01");
    assert_eq!(status_get, StatusCode::OK);
    assert_eq!(fetched["task"]["title"], "Buy milk");
}

#[rstest]
#[tokio::test]
async fn test_create_rejects_blank_title() {
    let context = create_test_context();

    let (status, body) = send(
        &context,
        Method::POST,
        "/api/v1/tasks/createTask",
        Some(&user()),
        Some(json!({ "title": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[rstest]
#[tokio::test]
async fn test_foreign_task_is_hidden_and_protected() {
    let context = create_test_context();
    let owner = user();
    let stranger = user();
    let task = create_task_as(&context, &owner, "Private").await;

    let (get_status, _) = send(
        &context,
        Method::GET,
        &format!("/api/v1/tasks/getSingleTask/{}", task.id),
        Some(&stranger),
        None,
    )
    .await;
    let (update_status, update_body) = send(
        &context,
        Method::PUT,
        &format!("/api/v1/tasks/updateTask/{}", task.id),
        Some(&stranger),
        Some(json!({ "completed": true })),
    )
    .await;
    let (delete_status, _) = send(
        &context,
        Method::DELETE,
        &format!("/api/v1/tasks/deleteTask/{}", task.id),
        Some(&stranger),
        None,
    )
    .await;

    assert_eq!(get_status, StatusCode::NOT_FOUND);
    assert_eq!(update_status, StatusCode::FORBIDDEN);
    assert_eq!(update_body["message"], "Unauthorized.");
    assert_eq!(delete_status, StatusCode::FORBIDDEN);
}

#[rstest]
#[tokio::test]
async fn test_update_and_delete_own_task() {
    let context = create_test_context();
    let owner = user();
    let task = create_task_as(&context, &owner, "Draft").await;

    let (update_status, updated) = send(
        &context,
        Method::PUT,
        &format!("/api/v1/tasks/updateTask/{}", task.id),
        Some(&owner),
        Some(json!({ "completed": true, "description": "final" })),
    )
    .await;
    let (delete_status, deleted) = send(
        &context,
        Method::DELETE,
        &format!("/api/v1/tasks/deleteTask/{}", task.id),
        Some(&owner),
        None,
    )
    .await;
    let (missing_status, _) = send(
        &context,
        Method::DELETE,
        &format!("/api/v1/tasks/deleteTask/{}", task.id),
        Some(&owner),
        None,
    )
    .await;

    assert_eq!(update_status, StatusCode::OK);
    assert_eq!(updated["task"]["completed"], true);
    assert_eq!(updated["task"]["description"], "final");
    assert_eq!(updated["task"]["version"], 2);
    assert_eq!(delete_status, StatusCode::OK);
    assert_eq!(deleted["message"], "Task deleted successfully.");
    assert_eq!(missing_status, StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test]
async fn test_list_is_owner_scoped_and_paginated() {
    let context = create_test_context();
    let owner = user();
    for title in ["one", "two", "three"] {
        create_task_as(&context, &owner, title).await;
    }
    create_task_as(&context, &user(), "foreign").await;

    let (status, page) = send(
        &context,
        Method::GET,
        "/api/v1/tasks/getTasks?page=2&limit=2",
        Some(&owner),
        None,
    )
    .await;
    let (_, everything) = send(
        &context,
        Method::GET,
        "/api/v1/tasks/admin/getAllTasksForAdmin",
        Some(&admin()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["tasks"].as_array().unwrap().len(), 1);
    assert_eq!(page["tasks"][0]["title"], "one");
    assert_eq!(everything["total"], 4);
}

#[rstest]
#[tokio::test]
async fn test_user_details_echo_credential() {
    let context = create_test_context();
    let requester = admin();

    let (status, body) = send(
        &context,
        Method::GET,
        "/api/v1/tasks/getUserDetails",
        Some(&requester),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], requester.user_id.to_string());
    assert_eq!(body["data"]["accountType"], "admin");
}

// =============================================================================
// Search
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_search_endpoint_returns_owned_matches() {
    let context = create_test_context();
    let owner = user();
    let task = create_task_as(&context, &owner, "Buy milk").await;
    create_task_as(&context, &user(), "Buy milk").await;
    context.flush().await;

    let (status, body) = send(
        &context,
        Method::GET,
        "/api/v1/tasks/search?query=milk",
        Some(&owner),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], task.id.to_string());
    assert_eq!(tasks[0]["userId"], owner.user_id.to_string());
}

#[rstest]
#[tokio::test]
async fn test_search_endpoint_raises_zero_limit_to_one() {
    let context = create_test_context();
    let owner = user();
    create_task_as(&context, &owner, "Buy milk").await;
    create_task_as(&context, &owner, "Milk the goat").await;
    context.flush().await;

    let (status, body) = send(
        &context,
        Method::GET,
        "/search?query=milk&limit=0",
        Some(&owner),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
}

#[rstest]
#[tokio::test]
async fn test_search_endpoint_rejects_empty_query() {
    let context = create_test_context();

    let (status, body) = send(&context, Method::GET, "/search?query=", Some(&user()), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_QUERY");
    assert_eq!(context.flaky.calls().searches, 0);
}

#[rstest]
#[tokio::test]
async fn test_search_endpoint_reports_outage() {
    let context = create_test_context();
    context.flaky.set_unavailable(true);

    let (status, body) = send(
        &context,
        Method::GET,
        "/search?query=zzz-no-match",
        Some(&user()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SEARCH_UNAVAILABLE");
}

#[rstest]
#[tokio::test]
async fn test_index_outage_does_not_fail_create() {
    let context = create_test_context();
    context.flaky.set_writes_failing(true);

    let (status, _) = send(
        &context,
        Method::POST,
        "/api/v1/tasks/createTask",
        Some(&user()),
        Some(json!({ "title": "Still saved" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_admin_reconcile_returns_report() {
    let context = create_test_context();
    context.flaky.set_writes_failing(true);
    create_task_as(&context, &user(), "Missed").await;
    context.flush().await;
    context.flaky.set_writes_failing(false);

    let (status, body) = send(
        &context,
        Method::POST,
        "/api/v1/tasks/admin/reconcile",
        Some(&admin()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["repairedUpserts"], 1);
    assert_eq!(body["report"]["failed"], 0);
}
