//! HTTP handlers for the task API.
//!
//! Mutations commit to the primary store first. Only after the commit does
//! a handler publish a notification and hand an index job to the
//! dispatcher, so index trouble never fails or delays a write.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::auth::{AdminRequester, JwtKeys};
use super::dto::{
    CreateTaskRequest, ListQuery, MessageResponse, TaskEnvelope, TaskListResponse,
    UpdateTaskRequest, validate_create_request, validate_update_request,
};
use super::error::ApiErrorResponse;
use crate::domain::{AccountType, OwnerId, Requester, Task, TaskEvent, TaskEventKind, TaskId};
use crate::infrastructure::{
    Backends, BroadcastPublisher, ServiceConfig, TaskEventPublisher, TaskRepository,
};
use crate::search::{
    DispatcherConfig, IndexDispatcher, IndexJob, IndexMutator, QueryPlanner, ReconcileReport,
    Reconciler, RetryPolicy, SearchService,
};

const TASK_NOT_FOUND: &str = "Task not found.";

// =============================================================================
// Application State
// =============================================================================

/// Shared application dependencies.
///
/// The search index client is shared by the dispatcher, the search service
/// and the reconciler; it is created once by the backend factory.
#[derive(Clone)]
pub struct AppState {
    /// Primary task store.
    pub task_repository: Arc<dyn TaskRepository>,
    /// Index job lanes.
    pub dispatcher: Arc<IndexDispatcher>,
    /// Search execution.
    pub search_service: SearchService,
    /// Drift repair.
    pub reconciler: Arc<Reconciler>,
    /// Notification sink.
    pub publisher: Arc<dyn TaskEventPublisher>,
    /// Credential keys.
    pub jwt_keys: Arc<JwtKeys>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .field("search_service", &self.search_service)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.jwt_keys)
    }
}

impl AppState {
    /// Wires the search components over initialized backends.
    ///
    /// Spawns the dispatcher lanes, so it must run inside a tokio runtime.
    #[must_use]
    pub fn from_backends(backends: Backends, config: &ServiceConfig) -> Self {
        let policy = RetryPolicy {
            attempts: config.index_write_attempts,
            attempt_timeout: config.index_write_timeout,
            ..RetryPolicy::default()
        };
        let mutator = IndexMutator::new(
            Arc::clone(&backends.search_index),
            Arc::clone(&backends.repair_queue),
            policy,
        );
        let dispatcher = IndexDispatcher::spawn(
            mutator.clone(),
            DispatcherConfig {
                lanes: config.index_lanes,
                lane_capacity: config.index_lane_capacity,
                ..DispatcherConfig::default()
            },
        );
        let search_service = SearchService::new(
            Arc::clone(&backends.search_index),
            QueryPlanner::new(),
            config.search_timeout,
        );
        let reconciler = Reconciler::new(
            Arc::clone(&backends.task_repository),
            backends.search_index,
            mutator,
            config.reconcile_batch_size,
        );

        Self {
            task_repository: backends.task_repository,
            dispatcher: Arc::new(dispatcher),
            search_service,
            reconciler: Arc::new(reconciler),
            publisher: Arc::new(BroadcastPublisher::default()),
            jwt_keys: Arc::new(JwtKeys::new(&config.jwt_secret)),
        }
    }

    /// Publishes the notification for a committed mutation and queues its
    /// index job.
    async fn after_commit(&self, kind: TaskEventKind, task: &Task) {
        self.publisher.publish(TaskEvent::for_task(kind, task));
        let job = match kind {
            TaskEventKind::Created | TaskEventKind::Updated => IndexJob::Upsert(task.clone()),
            TaskEventKind::Deleted => IndexJob::Remove(task.task_id),
        };
        self.dispatcher.submit(job).await;
    }

    /// Loads a task the requester may see, or 404.
    async fn visible_task(
        &self,
        requester: &Requester,
        id: &str,
    ) -> Result<Task, ApiErrorResponse> {
        let task_id: TaskId = id
            .parse()
            .map_err(|_| ApiErrorResponse::not_found(TASK_NOT_FOUND))?;
        self.task_repository
            .find_by_id(&task_id)
            .await?
            .filter(|task| requester.can_access_task(task))
            .ok_or_else(|| ApiErrorResponse::not_found(TASK_NOT_FOUND))
    }

    /// Loads a task the requester may modify: 404 if absent, 403 if foreign.
    async fn writable_task(
        &self,
        requester: &Requester,
        id: &str,
    ) -> Result<Task, ApiErrorResponse> {
        let task_id: TaskId = id
            .parse()
            .map_err(|_| ApiErrorResponse::not_found(TASK_NOT_FOUND))?;
        let task = self
            .task_repository
            .find_by_id(&task_id)
            .await?
            .ok_or_else(|| ApiErrorResponse::not_found(TASK_NOT_FOUND))?;
        if !requester.can_access_task(&task) {
            tracing::info!(task_id = %task.task_id, user_id = %requester.user_id, "Rejected write to foreign task");
            return Err(ApiErrorResponse::forbidden("Unauthorized."));
        }
        Ok(task)
    }
}

// =============================================================================
// GET /health Handler
// =============================================================================

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check endpoint.
///
/// ```json
/// { "status": "healthy", "version": "0.1.0" }
/// ```
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// =============================================================================
// Task Handlers
// =============================================================================

/// Lists the requester's tasks (all tasks for admins), newest first.
///
/// # Errors
///
/// Returns 500 if the primary store fails.
pub async fn list_tasks(
    State(state): State<AppState>,
    requester: Requester,
    Query(query): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiErrorResponse> {
    let result = state
        .task_repository
        .list(requester.owner_scope(), query.pagination())
        .await?;
    Ok(Json(TaskListResponse::from(result)))
}

/// Returns one task.
///
/// # Errors
///
/// Returns 404 when the task is absent or owned by someone else.
pub async fn get_single_task(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<TaskEnvelope>, ApiErrorResponse> {
    let task = state.visible_task(&requester, &id).await?;
    Ok(Json(TaskEnvelope::new(&task)))
}

/// Creates a task owned by the requester.
///
/// # Request Body
///
/// ```json
/// { "title": "Buy milk", "description": "two litres", "dueDate": "2026-03-01", "completed": false }
/// ```
///
/// # Errors
///
/// Returns 400 on validation failure and 500 if the primary store fails.
pub async fn create_task(
    State(state): State<AppState>,
    requester: Requester,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskEnvelope>), ApiErrorResponse> {
    let fields = validate_create_request(&request)?;
    let task = state
        .task_repository
        .create(fields, requester.user_id)
        .await?;

    tracing::info!(task_id = %task.task_id, user_id = %task.owner_id, "Task created");
    state.after_commit(TaskEventKind::Created, &task).await;

    Ok((StatusCode::CREATED, Json(TaskEnvelope::new(&task))))
}

/// Applies a partial update.
///
/// # Errors
///
/// Returns 400 on validation failure, 404 if absent, 403 if the task belongs
/// to someone else and the requester is not an admin.
pub async fn update_task(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<TaskEnvelope>, ApiErrorResponse> {
    let patch = validate_update_request(&request)?;
    let current = state.writable_task(&requester, &id).await?;
    let task = state
        .task_repository
        .update(&current.task_id, &patch)
        .await?
        .ok_or_else(|| ApiErrorResponse::not_found(TASK_NOT_FOUND))?;

    tracing::info!(task_id = %task.task_id, version = task.version, "Task updated");
    state.after_commit(TaskEventKind::Updated, &task).await;

    Ok(Json(TaskEnvelope::new(&task)))
}

/// Deletes a task.
///
/// # Errors
///
/// Returns 404 if absent and 403 if the task belongs to someone else and
/// the requester is not an admin.
pub async fn delete_task(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiErrorResponse> {
    let task = state.writable_task(&requester, &id).await?;
    if !state.task_repository.delete(&task.task_id).await? {
        return Err(ApiErrorResponse::not_found(TASK_NOT_FOUND));
    }

    tracing::info!(task_id = %task.task_id, "Task deleted");
    state.after_commit(TaskEventKind::Deleted, &task).await;

    Ok(Json(MessageResponse::new("Task deleted successfully.")))
}

// =============================================================================
// User Details
// =============================================================================

/// Identity carried by the requester's credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    /// User id.
    pub id: OwnerId,
    /// Email address.
    pub email: Option<String>,
    /// Account type.
    pub account_type: AccountType,
}

/// `{ success, message, data }` for user details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetailsResponse {
    /// Always `true`.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// The requester's identity.
    pub data: UserDetails,
}

/// Returns the identity the requester authenticated as.
pub async fn get_user_details(requester: Requester) -> Json<UserDetailsResponse> {
    Json(UserDetailsResponse {
        success: true,
        message: "User Data fetched successfully".to_string(),
        data: UserDetails {
            id: requester.user_id,
            email: requester.email,
            account_type: requester.account_type,
        },
    })
}

// =============================================================================
// Admin Handlers
// =============================================================================

/// Lists every task, newest first.
///
/// # Errors
///
/// Returns 401 for non-admins and 500 if the primary store fails.
pub async fn admin_list_tasks(
    State(state): State<AppState>,
    AdminRequester(_): AdminRequester,
    Query(query): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiErrorResponse> {
    let result = state.task_repository.list(None, query.pagination()).await?;
    Ok(Json(TaskListResponse::from(result)))
}

/// Updates any task.
///
/// # Errors
///
/// Returns 401 for non-admins; otherwise as [`update_task`].
pub async fn admin_update_task(
    state: State<AppState>,
    AdminRequester(requester): AdminRequester,
    id: Path<String>,
    request: Json<UpdateTaskRequest>,
) -> Result<Json<TaskEnvelope>, ApiErrorResponse> {
    update_task(state, requester, id, request).await
}

/// Deletes any task.
///
/// # Errors
///
/// Returns 401 for non-admins; otherwise as [`delete_task`].
pub async fn admin_delete_task(
    state: State<AppState>,
    AdminRequester(requester): AdminRequester,
    id: Path<String>,
) -> Result<Json<MessageResponse>, ApiErrorResponse> {
    delete_task(state, requester, id).await
}

/// Query string of the reconcile endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileParams {
    /// Only process the repair queue instead of walking everything.
    #[serde(default)]
    pub pending_only: bool,
}

/// `{ success, report }`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResponse {
    /// Always `true`.
    pub success: bool,
    /// Outcome counts.
    pub report: ReconcileReport,
}

/// Runs a reconciliation now.
///
/// # Errors
///
/// Returns 401 for non-admins, 409 if a run is already in progress, 503 if
/// the index or repair queue cannot be read.
pub async fn reconcile(
    State(state): State<AppState>,
    AdminRequester(requester): AdminRequester,
    Query(params): Query<ReconcileParams>,
) -> Result<Json<ReconcileResponse>, ApiErrorResponse> {
    tracing::info!(user_id = %requester.user_id, pending_only = params.pending_only, "Reconciliation requested");
    let report = if params.pending_only {
        state.reconciler.reconcile_pending().await?
    } else {
        state.reconciler.reconcile().await?
    };
    Ok(Json(ReconcileResponse {
        success: true,
        report,
    }))
}
