//! Search index client.
//!
//! The index holds [`SearchDocument`] projections keyed by task id. It is a
//! derived cache: every operation is safe to repeat, and losing the whole
//! index only costs a full reconciliation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{SearchDocument, TaskId};
use crate::search::SearchQuery;

/// Logical name of the task index.
pub const TASK_INDEX_NAME: &str = "tasks";

// =============================================================================
// Index Error
// =============================================================================

/// Errors returned by index operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The index could not be reached or answered with a server error.
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish in time.
    #[error("Index operation timed out")]
    Timeout,

    /// The index refused the request (client error).
    #[error("Index rejected request: {0}")]
    Rejected(String),

    /// A document or response body could not be (de)serialized.
    #[error("Index serialization error: {0}")]
    Serialization(String),
}

impl IndexError {
    /// Returns `true` if repeating the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

// =============================================================================
// Search Hit
// =============================================================================

/// A document matched by a search, with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matched document.
    pub document: SearchDocument,
    /// Relevance score; higher is better.
    pub score: f64,
}

/// Ranking order for hits: score descending, then `created_at` descending,
/// then id descending.
#[must_use]
pub fn rank_order(left: &SearchHit, right: &SearchHit) -> std::cmp::Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| right.document.created_at.cmp(&left.document.created_at))
        .then_with(|| right.document.task_id.cmp(&left.document.task_id))
}

// =============================================================================
// Search Index
// =============================================================================

/// Client for the task search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Writes or overwrites the document keyed by its task id.
    async fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError>;

    /// Deletes the document for `id`.
    ///
    /// Returns `Ok(true)` if a document existed. Absence is not an error.
    async fn delete(&self, id: &TaskId) -> Result<bool, IndexError>;

    /// Returns the documents among `ids` that exist, in no particular order.
    async fn get_many(&self, ids: &[TaskId]) -> Result<Vec<SearchDocument>, IndexError>;

    /// Returns up to `limit` document ids strictly greater than `cursor`, in
    /// ascending order. Used to walk the whole index.
    async fn ids_after(&self, cursor: Option<TaskId>, limit: usize)
    -> Result<Vec<TaskId>, IndexError>;

    /// Executes a planned search.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError>;

    /// Counts indexed documents.
    async fn count(&self) -> Result<u64, IndexError>;
}
