//! Index mutator: turns a committed record change into an index write.
//!
//! Writes are retried a bounded number of times. A write that still fails is
//! recorded in the repair queue and reported as [`IndexWriteResult::Failed`];
//! it is never propagated to the mutation caller.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{SearchDocument, Task, TaskId};
use crate::infrastructure::{IndexError, RepairQueue, SearchIndex};

/// Default number of attempts per index write.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Default timeout of a single index write attempt.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default backoff step between attempts.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(50);

// =============================================================================
// Index Write Result
// =============================================================================

/// Outcome of a single index mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IndexWriteResult {
    /// The document was written (created or overwritten).
    Written,
    /// The delete succeeded; `existed` tells whether a document was there.
    Removed {
        /// Whether a document was present before the delete.
        existed: bool,
    },
    /// All attempts failed; the id has been queued for repair.
    Failed {
        /// Last error observed.
        reason: String,
    },
}

impl IndexWriteResult {
    /// Returns `true` unless the write failed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub attempts: u32,
    /// Timeout of each attempt; a timed-out attempt counts as failed.
    pub attempt_timeout: Duration,
    /// Delay before attempt `n + 1` is `backoff_step * n`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_WRITE_ATTEMPTS,
            attempt_timeout: DEFAULT_WRITE_TIMEOUT,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds, fails permanently, or attempts
    /// run out. Returns the last error and the number of attempts made.
    async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, (IndexError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = tokio::time::timeout(self.attempt_timeout, operation())
                .await
                .unwrap_or(Err(IndexError::Timeout));
            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < attempts => {
                    tracing::debug!(attempt, error = %error, "Retrying index write");
                    tokio::time::sleep(self.backoff_step * attempt).await;
                    attempt += 1;
                }
                Err(error) => return Err((error, attempt)),
            }
        }
    }
}

// =============================================================================
// Index Mutator
// =============================================================================

/// Applies record changes to the search index.
#[derive(Clone)]
pub struct IndexMutator {
    index: Arc<dyn SearchIndex>,
    repair_queue: Arc<dyn RepairQueue>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for IndexMutator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("IndexMutator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl IndexMutator {
    /// Creates a mutator writing to `index` and recording failures in
    /// `repair_queue`.
    #[must_use]
    pub fn new(
        index: Arc<dyn SearchIndex>,
        repair_queue: Arc<dyn RepairQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            index,
            repair_queue,
            policy,
        }
    }

    /// Returns the repair queue failures are recorded in.
    #[must_use]
    pub fn repair_queue(&self) -> &Arc<dyn RepairQueue> {
        &self.repair_queue
    }

    /// Writes the projection of `task`, overwriting any existing document.
    pub async fn upsert(&self, task: &Task) -> IndexWriteResult {
        let document = SearchDocument::from(task);
        match self.policy.run(|| self.index.upsert(&document)).await {
            Ok(()) => IndexWriteResult::Written,
            Err((error, attempts)) => self.fail(&task.task_id, "upsert", &error, attempts).await,
        }
    }

    /// Deletes the document of `id`. Absence counts as success.
    pub async fn remove(&self, id: &TaskId) -> IndexWriteResult {
        match self.policy.run(|| self.index.delete(id)).await {
            Ok(existed) => IndexWriteResult::Removed { existed },
            Err((error, attempts)) => self.fail(id, "remove", &error, attempts).await,
        }
    }

    /// Records `id` for repair without attempting a write.
    ///
    /// Used when a write could not even be scheduled.
    pub async fn defer(&self, id: &TaskId) {
        if let Err(error) = self.repair_queue.mark(id).await {
            tracing::error!(task_id = %id, error = %error, "Failed to queue index repair");
        }
    }

    async fn fail(
        &self,
        id: &TaskId,
        operation: &'static str,
        error: &IndexError,
        attempts: u32,
    ) -> IndexWriteResult {
        tracing::warn!(
            task_id = %id,
            operation,
            attempt = attempts,
            reason = %error,
            "Index write failed, queued for repair"
        );
        self.defer(id).await;
        IndexWriteResult::Failed {
            reason: error.to_string(),
        }
    }
}
