//! Common test helpers for integration tests.
//!
//! Every context runs fully in memory. The search index is wrapped in a
//! `FlakySearchIndex` so tests can count index calls and simulate outages.
//!
//! # Note
//!
//! Rust compiles each integration test file as a separate crate, so helpers
//! used by only some files would otherwise warn as dead code.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;

use task_search_api::api::dto::{CreateTaskRequest, TaskResponse};
use task_search_api::api::{AppState, create_task};
use task_search_api::domain::{OwnerId, Requester};
use task_search_api::infrastructure::{
    Backends, FlakySearchIndex, InMemoryRepairQueue, InMemorySearchIndex,
    InMemoryTaskRepository, ServiceConfig,
};

pub const JWT_SECRET: &str = "integration-test-secret";

// =============================================================================
// Test Context
// =============================================================================

/// Application state plus handles on the concrete in-memory backends.
pub struct TestContext {
    pub state: AppState,
    pub repository: Arc<InMemoryTaskRepository>,
    pub index: Arc<InMemorySearchIndex>,
    pub flaky: Arc<FlakySearchIndex>,
    pub repair_queue: Arc<InMemoryRepairQueue>,
}

impl TestContext {
    /// Waits until every index job submitted so far has been applied.
    pub async fn flush(&self) {
        self.state.dispatcher.flush().await;
    }

    /// Issues a bearer header value for `requester`.
    pub fn bearer(&self, requester: &Requester) -> String {
        let token = self
            .state
            .jwt_keys
            .issue(requester, Duration::from_secs(3600))
            .unwrap();
        format!("Bearer {token}")
    }
}

/// Creates a test context with default search settings.
pub fn create_test_context() -> TestContext {
    let config = ServiceConfig::builder()
        .jwt_secret(JWT_SECRET)
        .search_timeout(Duration::from_millis(500))
        .reconcile_interval(None)
        .build()
        .unwrap();

    let repository = Arc::new(InMemoryTaskRepository::new());
    let index = Arc::new(InMemorySearchIndex::new());
    let flaky = Arc::new(FlakySearchIndex::new(index.clone()));
    let repair_queue = Arc::new(InMemoryRepairQueue::new());

    let backends = Backends {
        task_repository: repository.clone(),
        search_index: flaky.clone(),
        repair_queue: repair_queue.clone(),
    };

    TestContext {
        state: AppState::from_backends(backends, &config),
        repository,
        index,
        flaky,
        repair_queue,
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A regular account.
pub fn user() -> Requester {
    Requester::user(OwnerId::generate())
}

/// An administrative account.
pub fn admin() -> Requester {
    Requester::admin(OwnerId::generate())
}

/// Creates a task through the create handler, as a client would.
pub async fn create_task_as(
    context: &TestContext,
    requester: &Requester,
    title: &str,
) -> TaskResponse {
    submit_create(context, requester, title, None).await
}

/// Creates a task with a description through the create handler.
pub async fn create_task_with_description(
    context: &TestContext,
    requester: &Requester,
    title: &str,
    description: &str,
) -> TaskResponse {
    submit_create(context, requester, title, Some(description.to_string())).await
}

async fn submit_create(
    context: &TestContext,
    requester: &Requester,
    title: &str,
    description: Option<String>,
) -> TaskResponse {
    let request = CreateTaskRequest {
        title: title.to_string(),
        description,
        due_date: None,
        completed: false,
    };
    let (_, Json(envelope)) = create_task(
        State(context.state.clone()),
        requester.clone(),
        Json(request),
    )
    .await
    .unwrap();
    envelope.task
}
