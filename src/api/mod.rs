//! API module for HTTP handlers.
//!
//! This module contains route definitions and request/response handlers.

pub mod auth;
pub mod dto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod search;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

pub use auth::{AdminRequester, AuthError, Claims, JwtKeys};
pub use dto::{CreateTaskRequest, TaskResponse, UpdateTaskRequest};
pub use error::{ApiError, ApiErrorResponse, FieldError, ValidationError};
pub use events::task_events;
pub use handlers::{
    AppState, HealthResponse, admin_delete_task, admin_list_tasks, admin_update_task,
    create_task, delete_task, get_single_task, get_user_details, health_check, list_tasks,
    reconcile, update_task,
};
pub use search::search_tasks;

/// Builds the application router without middleware layers.
pub fn router(state: AppState) -> Router {
    let tasks = Router::new()
        .route("/getTasks", get(list_tasks))
        .route("/getUserDetails", get(get_user_details))
        .route("/createTask", post(create_task))
        .route("/getSingleTask/{id}", get(get_single_task))
        .route("/updateTask/{id}", put(update_task))
        .route("/deleteTask/{id}", delete(delete_task))
        .route("/search", get(search_tasks))
        .route("/events", get(task_events))
        .route("/admin/getAllTasksForAdmin", get(admin_list_tasks))
        .route("/admin/updateTask/{id}", put(admin_update_task))
        .route("/admin/deleteTask/{id}", delete(admin_delete_task))
        .route("/admin/reconcile", post(reconcile));

    Router::new()
        .route("/health", get(health_check))
        .route("/search", get(search_tasks))
        .nest("/api/v1/tasks", tasks)
        .with_state(state)
}
