//! Record store client for the primary task store.
//!
//! The primary store is the source of truth. Every backend implements
//! [`TaskRepository`] so handlers, the index dispatcher and the reconciler
//! depend only on the trait object.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{NewTask, OwnerId, Task, TaskId, TaskPatch};

// =============================================================================
// Repository Error
// =============================================================================

/// Errors that can occur during repository operations.
///
/// Absence is not an error: lookups return `Option` and deletes return
/// `bool`.
#[derive(Debug, Error, Clone)]
pub enum RepositoryError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored row could not be mapped to a task.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        Self::DatabaseError(error.to_string())
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Page number (0-indexed).
    pub page: u32,
    /// Number of items per page.
    pub page_size: u32,
}

impl Pagination {
    /// Creates new pagination parameters.
    ///
    /// A `page_size` of 0 is raised to 1.
    #[must_use]
    pub const fn new(page: u32, page_size: u32) -> Self {
        let page_size = if page_size == 0 { 1 } else { page_size };
        Self { page, page_size }
    }

    /// Returns the offset for database queries.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.page as u64 * self.page_size as u64
    }

    /// Returns the limit for database queries.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 10,
        }
    }
}

/// Paginated result containing items and total count.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    /// The items in the current page.
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    /// Current page (0-indexed).
    pub page: u32,
    /// Number of items per page.
    pub page_size: u32,
}

impl<T> PaginatedResult<T> {
    /// Creates a new paginated result.
    #[must_use]
    pub const fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }

    /// Returns the total number of pages.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64)
    }
}

// =============================================================================
// Task Repository
// =============================================================================

/// Typed accessor to primary task records.
///
/// Implementations serialize writers per record, so `version` and
/// `updated_at` strictly increase for each record.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persists a new task and returns it with its assigned id,
    /// timestamps and version.
    async fn create(&self, fields: NewTask, owner_id: OwnerId) -> Result<Task, RepositoryError>;

    /// Applies a partial update.
    ///
    /// Returns `Ok(None)` if the task does not exist.
    async fn update(&self, id: &TaskId, patch: &TaskPatch)
    -> Result<Option<Task>, RepositoryError>;

    /// Deletes a task by its ID.
    ///
    /// Returns `Ok(true)` if the task was deleted, `Ok(false)` if it didn't exist.
    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError>;

    /// Finds a task by its ID.
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Lists tasks newest first, restricted to `owner_scope` when given.
    async fn list(
        &self,
        owner_scope: Option<OwnerId>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Task>, RepositoryError>;

    /// Returns up to `limit` tasks with an id strictly greater than `cursor`,
    /// in ascending id order. Used for batch walks.
    async fn list_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError>;

    /// Returns the tasks among `ids` that exist, in no particular order.
    async fn find_many(&self, ids: &[TaskId]) -> Result<Vec<Task>, RepositoryError>;

    /// Counts all tasks.
    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 10, 0)]
    #[case(2, 10, 20)]
    #[case(3, 7, 21)]
    fn test_pagination_offset(#[case] page: u32, #[case] size: u32, #[case] expected: u64) {
        assert_eq!(Pagination::new(page, size).offset(), expected);
    }

    #[rstest]
    fn test_zero_page_size_is_raised() {
        assert_eq!(Pagination::new(0, 0).limit(), 1);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(10, 1)]
    #[case(11, 2)]
    #[case(25, 3)]
    fn test_paginated_result_pages(#[case] total: u64, #[case] expected_pages: u64) {
        let result: PaginatedResult<()> = PaginatedResult::new(vec![], total, Pagination::new(0, 10));
        assert_eq!(result.total_pages(), expected_pages);
    }
}
