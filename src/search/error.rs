//! Errors surfaced to search callers.

use thiserror::Error;

use crate::infrastructure::IndexError;

/// Errors returned by query planning and search execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The free-text query was rejected before touching the index.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The index was unreachable, erroring, or timed out.
    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),
}

impl From<IndexError> for SearchError {
    fn from(error: IndexError) -> Self {
        Self::SearchUnavailable(error.to_string())
    }
}
