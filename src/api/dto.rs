//! Data Transfer Objects for API requests and responses.
//!
//! This module contains DTOs that are separate from domain models,
//! providing a clean API contract. All JSON is camelCase.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::{FieldError, ValidationError};
use crate::domain::{NewTask, OwnerId, Task, TaskId, TaskPatch, Timestamp};
use crate::infrastructure::{PaginatedResult, Pagination};
use crate::search::TaskSearchResult;

/// Longest accepted title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;
/// Longest accepted description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
/// Page size of list endpoints when `limit` is absent.
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Largest page size of list endpoints.
pub const MAX_PAGE_SIZE: u32 = 100;

// =============================================================================
// Task DTOs
// =============================================================================

/// Request DTO for creating a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Title of the task.
    pub title: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional due date (`YYYY-MM-DD`).
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Initial completion state.
    #[serde(default)]
    pub completed: bool,
}

/// Request DTO for a partial update.
///
/// An absent field is left unchanged; `null` clears `description` and
/// `dueDate`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    /// New completion state.
    #[serde(default)]
    pub completed: Option<bool>,
    /// New due date.
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Response DTO for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    /// Task ID.
    pub id: TaskId,
    /// Title of the task.
    pub title: String,
    /// Description of the task.
    pub description: Option<String>,
    /// Due date.
    pub due_date: Option<NaiveDate>,
    /// Completion state.
    pub completed: bool,
    /// Owner of the task.
    pub user_id: OwnerId,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
    /// Current version.
    pub version: u64,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.task_id,
            title: task.title.clone(),
            description: task.description.clone(),
            due_date: task.due_date,
            completed: task.completed,
            user_id: task.owner_id,
            created_at: task.created_at,
            updated_at: task.updated_at,
            version: task.version,
        }
    }
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self::from(&task)
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// `{ success, task }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Always `true`.
    pub success: bool,
    /// The task.
    pub task: TaskResponse,
}

impl TaskEnvelope {
    /// Wraps a task.
    #[must_use]
    pub fn new(task: &Task) -> Self {
        Self {
            success: true,
            task: TaskResponse::from(task),
        }
    }
}

/// `{ success, tasks, total, page, totalPages }` with a 1-based `page`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListResponse {
    /// Always `true`.
    pub success: bool,
    /// Tasks on this page.
    pub tasks: Vec<TaskResponse>,
    /// Total tasks in scope.
    pub total: u64,
    /// Page number, starting at 1.
    pub page: u32,
    /// Number of pages.
    pub total_pages: u64,
}

impl From<PaginatedResult<Task>> for TaskListResponse {
    fn from(result: PaginatedResult<Task>) -> Self {
        Self {
            success: true,
            total: result.total,
            page: result.page.saturating_add(1),
            total_pages: result.total_pages(),
            tasks: result.items.iter().map(TaskResponse::from).collect(),
        }
    }
}

/// `{ success, message }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Always `true`.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl MessageResponse {
    /// Creates a successful message response.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// `{ success, tasks }` for search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Always `true`.
    pub success: bool,
    /// Matching tasks in rank order.
    pub tasks: Vec<TaskSearchResult>,
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Query string of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    /// Page number, starting at 1.
    pub page: Option<u32>,
    /// Page size.
    pub limit: Option<u32>,
}

impl ListQuery {
    /// Converts to store pagination, clamping the page size to `1..=100`.
    #[must_use]
    pub fn pagination(self) -> Pagination {
        let page = self.page.unwrap_or(1).max(1) - 1;
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Pagination::new(page, limit)
    }
}

/// Query string of search endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    /// Free-text query.
    #[serde(default)]
    pub query: String,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Results to skip.
    pub offset: Option<u32>,
}

// =============================================================================
// Validation
// =============================================================================

/// Validates a task title.
///
/// # Validation Rules
///
/// - Title must not be empty after trimming
/// - Title must not exceed 200 characters
///
/// # Errors
///
/// Returns `ValidationError` naming the `title` field.
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();

    if title.is_empty() {
        return Err(ValidationError::single("title", "Title is required"));
    }

    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::single(
            "title",
            "Title must not exceed 200 characters",
        ));
    }

    Ok(title.to_string())
}

/// Validates a task description. Blank descriptions become `None`.
///
/// # Errors
///
/// Returns `ValidationError` if the description exceeds 5000 characters.
pub fn validate_description(description: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(description) = description.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(None);
    };

    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ValidationError::single(
            "description",
            "Description must not exceed 5000 characters",
        ));
    }

    Ok(Some(description.to_string()))
}

fn collect<T>(result: Result<T, ValidationError>, errors: &mut Vec<FieldError>) -> Option<T> {
    result.map_err(|error| errors.extend(error.errors)).ok()
}

/// Validates a create request into store-ready fields.
///
/// # Errors
///
/// Returns every field error found.
pub fn validate_create_request(request: &CreateTaskRequest) -> Result<NewTask, ValidationError> {
    let mut errors = Vec::new();
    let title = collect(validate_title(&request.title), &mut errors);
    let description = collect(
        validate_description(request.description.as_deref()),
        &mut errors,
    );

    match (title, description) {
        (Some(title), Some(description)) if errors.is_empty() => Ok(NewTask {
            title,
            description,
            completed: request.completed,
            due_date: request.due_date,
        }),
        _ => Err(ValidationError::new(errors)),
    }
}

/// Validates an update request into a patch.
///
/// # Errors
///
/// Returns every field error found.
pub fn validate_update_request(request: &UpdateTaskRequest) -> Result<TaskPatch, ValidationError> {
    let mut errors = Vec::new();
    let title = request
        .title
        .as_deref()
        .and_then(|title| collect(validate_title(title), &mut errors));
    let description = request.description.as_ref().and_then(|description| {
        collect(validate_description(description.as_deref()), &mut errors)
    });

    if !errors.is_empty() {
        return Err(ValidationError::new(errors));
    }

    Ok(TaskPatch {
        title,
        description,
        completed: request.completed,
        due_date: request.due_date,
    })
}

// =============================================================================
// Tests
// =============================================================================
