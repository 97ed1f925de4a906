//! Search service: validate, execute, authorize and shape search results.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{OwnerId, Requester, TaskId, Timestamp};
use crate::infrastructure::search_index::rank_order;
use crate::infrastructure::{IndexError, SearchHit, SearchIndex};
use crate::search::{QueryPlanner, SearchError};

/// Default time a search may take before it is abandoned.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_millis(3000);

/// A search result: the task id with its denormalized fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSearchResult {
    /// Task identifier.
    pub id: TaskId,
    /// Title as indexed.
    pub title: String,
    /// Description as indexed.
    pub description: Option<String>,
    /// Due date as indexed.
    pub due_date: Option<NaiveDate>,
    /// Completion state as indexed.
    pub completed: bool,
    /// Owner of the task.
    pub user_id: OwnerId,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Relevance score.
    #[serde(skip)]
    pub score: f64,
}

impl From<SearchHit> for TaskSearchResult {
    fn from(hit: SearchHit) -> Self {
        let document = hit.document;
        Self {
            id: document.task_id,
            title: document.title,
            description: document.description,
            due_date: document.due_date,
            completed: document.completed,
            user_id: document.owner_id,
            created_at: document.created_at,
            score: hit.score,
        }
    }
}

/// Runs owner-scoped searches against the index.
///
/// Never falls back to scanning the primary store: when the index is
/// unavailable, callers get [`SearchError::SearchUnavailable`].
#[derive(Clone)]
pub struct SearchService {
    index: Arc<dyn SearchIndex>,
    planner: QueryPlanner,
    timeout: Duration,
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SearchService")
            .field("planner", &self.planner)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SearchService {
    /// Creates a service over `index`.
    #[must_use]
    pub fn new(index: Arc<dyn SearchIndex>, planner: QueryPlanner, timeout: Duration) -> Self {
        Self {
            index,
            planner,
            timeout,
        }
    }

    /// Searches with the default page size.
    ///
    /// # Errors
    ///
    /// See [`SearchService::search_page`].
    pub async fn search(
        &self,
        free_text: &str,
        requester: &Requester,
    ) -> Result<Vec<TaskSearchResult>, SearchError> {
        self.search_page(free_text, requester, None, None).await
    }

    /// Searches for `free_text` on behalf of `requester`.
    ///
    /// Zero hits is `Ok(vec![])`.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidQuery`] if the planner rejects the text; the
    ///   index is not contacted.
    /// - [`SearchError::SearchUnavailable`] if the index errors or does not
    ///   answer within the timeout.
    pub async fn search_page(
        &self,
        free_text: &str,
        requester: &Requester,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<TaskSearchResult>, SearchError> {
        let query = self
            .planner
            .plan(free_text, requester.user_id, requester.is_privileged())?
            .paginate(limit, offset);

        let mut hits = tokio::time::timeout(self.timeout, self.index.search(&query))
            .await
            .unwrap_or(Err(IndexError::Timeout))
            .inspect_err(|error| {
                tracing::warn!(error = %error, "Search index query failed");
            })?;

        let returned = hits.len();
        hits.retain(|hit| requester.can_access(&hit.document.owner_id));
        if hits.len() != returned {
            tracing::warn!(
                dropped = returned - hits.len(),
                "Index returned hits outside the requester's scope"
            );
        }
        hits.sort_by(rank_order);

        tracing::debug!(tokens = query.tokens.len(), hits = hits.len(), "Search completed");
        Ok(hits.into_iter().map(TaskSearchResult::from).collect())
    }
}
