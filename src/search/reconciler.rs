//! Consistency reconciler: finds and repairs drift between the primary
//! store and the search index.
//!
//! A full run walks both sides in id order:
//!
//! 1. every record is compared with its document, and missing or stale
//!    documents are rewritten;
//! 2. every document whose record no longer exists is deleted;
//! 3. repair-queue entries present when the run started are drained, and any
//!    not covered by the walks are repaired individually.
//!
//! Repairs go through the [`IndexMutator`], so a repair that fails is queued
//! again for the next run. Every rewrite is confirmed against the primary
//! store afterwards, so a record deleted or updated while the run held an
//! older copy is never left behind in its old form. Without concurrent
//! mutations, a second run right after a successful one reports no repairs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};

use crate::domain::{IndexEntryState, IndexTransition, SearchDocument, Task, TaskId};
use crate::infrastructure::{
    IndexError, RepairQueue, RepairQueueError, RepositoryError, SearchIndex, TaskRepository,
};
use crate::search::{IndexMutator, IndexWriteResult};

/// Default number of records or documents read per batch.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Writes per repaired entry before a record that keeps changing is left to
/// the next run.
const MAX_REPAIR_WRITES: usize = 3;

// =============================================================================
// Report and Errors
// =============================================================================

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Missing or stale documents rewritten.
    pub repaired_upserts: u64,
    /// Orphaned documents deleted.
    pub repaired_deletions: u64,
    /// Records whose document was already current.
    pub unchanged: u64,
    /// Repairs that failed and were queued again.
    pub failed: u64,
}

impl ReconcileReport {
    /// Total number of successful repairs.
    #[must_use]
    pub const fn repairs(&self) -> u64 {
        self.repaired_upserts + self.repaired_deletions
    }

    /// Returns `true` if the run found nothing to do.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.repairs() == 0 && self.failed == 0
    }
}

/// Errors that abort a reconciliation run.
///
/// Queue entries drained by an aborted run are put back.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    /// Another run is in progress.
    #[error("Reconciliation already running")]
    AlreadyRunning,

    /// The primary store could not be read.
    #[error("Primary store error: {0}")]
    Repository(String),

    /// The index could not be read.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The repair queue could not be read.
    #[error("Repair queue error: {0}")]
    RepairQueue(#[from] RepairQueueError),
}

impl From<RepositoryError> for ReconcileError {
    fn from(error: RepositoryError) -> Self {
        Self::Repository(error.to_string())
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Detects and repairs index drift. Safe to run while the service serves
/// traffic; it takes no lock that searches or mutations wait on.
pub struct Reconciler {
    repository: Arc<dyn TaskRepository>,
    index: Arc<dyn SearchIndex>,
    mutator: IndexMutator,
    batch_size: usize,
    running: Mutex<()>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Reconciler")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        index: Arc<dyn SearchIndex>,
        mutator: IndexMutator,
        batch_size: usize,
    ) -> Self {
        Self {
            repository,
            index,
            mutator,
            batch_size: batch_size.max(1),
            running: Mutex::new(()),
        }
    }

    fn repair_queue(&self) -> &Arc<dyn RepairQueue> {
        self.mutator.repair_queue()
    }

    /// Runs a full reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::AlreadyRunning`] if another run holds the
    /// reconciler, or an error if the primary store, the index or the repair
    /// queue cannot be read. Failed individual repairs do not abort the run;
    /// they are counted in [`ReconcileReport::failed`].
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let pending = self.drain_pending().await?;
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        let walked = async {
            self.walk_records(&mut report, &mut seen).await?;
            self.walk_documents(&mut report, &mut seen).await?;
            let leftover: Vec<TaskId> = pending
                .iter()
                .filter(|id| !seen.contains(*id))
                .copied()
                .collect();
            self.repair_ids(&leftover, &mut report).await
        }
        .await;

        if let Err(error) = walked {
            self.requeue(&pending).await;
            tracing::error!(error = %error, "Reconciliation aborted");
            return Err(error);
        }

        tracing::info!(
            repaired_upserts = report.repaired_upserts,
            repaired_deletions = report.repaired_deletions,
            unchanged = report.unchanged,
            failed = report.failed,
            "Reconciliation completed"
        );
        Ok(report)
    }

    /// Repairs only the ids currently in the repair queue.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::reconcile`].
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;

        let pending = self.drain_pending().await?;
        let mut report = ReconcileReport::default();
        if let Err(error) = self.repair_ids(&pending, &mut report).await {
            self.requeue(&pending).await;
            return Err(error);
        }

        tracing::info!(
            queued = pending.len(),
            repaired_upserts = report.repaired_upserts,
            repaired_deletions = report.repaired_deletions,
            failed = report.failed,
            "Pending index repairs processed"
        );
        Ok(report)
    }

    /// Runs [`Reconciler::reconcile`] every `interval` until `shutdown`
    /// turns `true` or its sender is dropped.
    pub async fn run_every(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Scheduled reconciliation started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.reconcile().await {
                        tracing::warn!(error = %error, "Scheduled reconciliation failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduled reconciliation stopped");
    }

    // -------------------------------------------------------------------------
    // Walks
    // -------------------------------------------------------------------------

    async fn walk_records(
        &self,
        report: &mut ReconcileReport,
        seen: &mut HashSet<TaskId>,
    ) -> Result<(), ReconcileError> {
        let mut cursor = None;
        loop {
            let tasks = self.repository.list_after(cursor, self.batch_size).await?;
            let Some(last) = tasks.last() else {
                return Ok(());
            };
            cursor = Some(last.task_id);

            let ids: Vec<TaskId> = tasks.iter().map(|task| task.task_id).collect();
            let documents = self.index.get_many(&ids).await?;
            seen.extend(ids.iter().copied());
            self.converge(&ids, tasks, documents, report).await;
        }
    }

    async fn walk_documents(
        &self,
        report: &mut ReconcileReport,
        seen: &mut HashSet<TaskId>,
    ) -> Result<(), ReconcileError> {
        let mut cursor = None;
        loop {
            let ids = self.index.ids_after(cursor, self.batch_size).await?;
            let Some(last) = ids.last() else {
                return Ok(());
            };
            cursor = Some(*last);

            let existing: HashSet<TaskId> = self
                .repository
                .find_many(&ids)
                .await?
                .into_iter()
                .map(|task| task.task_id)
                .collect();
            for id in ids {
                if existing.contains(&id) || !seen.insert(id) {
                    continue;
                }
                self.record_removal(&id, report).await;
            }
        }
    }

    async fn repair_ids(
        &self,
        ids: &[TaskId],
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for chunk in ids.chunks(self.batch_size) {
            let tasks = self.repository.find_many(chunk).await?;
            let documents = self.index.get_many(chunk).await?;
            self.converge(chunk, tasks, documents, report).await;
        }
        Ok(())
    }

    /// Brings the documents of `ids` in line with `tasks`.
    async fn converge(
        &self,
        ids: &[TaskId],
        tasks: Vec<Task>,
        documents: Vec<SearchDocument>,
        report: &mut ReconcileReport,
    ) {
        let mut tasks: HashMap<TaskId, Task> =
            tasks.into_iter().map(|task| (task.task_id, task)).collect();
        let documents: HashMap<TaskId, SearchDocument> = documents
            .into_iter()
            .map(|document| (document.task_id, document))
            .collect();

        for id in ids {
            match (tasks.remove(id), documents.get(id)) {
                (Some(task), document) => match IndexEntryState::classify(&task, document) {
                    IndexEntryState::Indexed => report.unchanged += 1,
                    state => self.repair_entry(task, state, report).await,
                },
                (None, Some(_)) => self.record_removal(id, report).await,
                (None, None) => {}
            }
        }
    }

    /// Rewrites the document of `task`, then confirms against the primary
    /// store that the record did not change while the write was in flight.
    ///
    /// A record deleted meanwhile has its document removed again. A record
    /// updated meanwhile is written again from the fresh copy. Ids that keep
    /// changing, or that cannot be confirmed, are queued for the next run.
    async fn repair_entry(
        &self,
        task: Task,
        mut state: IndexEntryState,
        report: &mut ReconcileReport,
    ) {
        let task_id = task.task_id;
        let mut snapshot = task;

        for _ in 0..MAX_REPAIR_WRITES {
            tracing::debug!(task_id = %task_id, ?state, version = snapshot.version, "Repairing index entry");
            if !self.mutator.upsert(&snapshot).await.is_success() {
                report.failed += 1;
                return;
            }
            state = advance(&task_id, state, IndexTransition::UpsertSucceeded);

            match self.repository.find_by_id(&task_id).await {
                Ok(Some(current)) if current.version == snapshot.version => {
                    tracing::trace!(task_id = %task_id, ?state, "Index entry repaired");
                    report.repaired_upserts += 1;
                    return;
                }
                Ok(Some(current)) => {
                    state = advance(&task_id, state, IndexTransition::RecordChanged);
                    snapshot = current;
                }
                Ok(None) => {
                    if self.mutator.remove(&task_id).await.is_success() {
                        let state = advance(&task_id, state, IndexTransition::DeleteSucceeded);
                        tracing::debug!(task_id = %task_id, ?state, "Record deleted during repair");
                    } else {
                        report.failed += 1;
                    }
                    return;
                }
                Err(error) => {
                    tracing::warn!(task_id = %task_id, error = %error, "Could not confirm index repair");
                    self.mutator.defer(&task_id).await;
                    report.failed += 1;
                    return;
                }
            }
        }

        tracing::warn!(task_id = %task_id, ?state, "Record kept changing during repair");
        self.mutator.defer(&task_id).await;
        report.failed += 1;
    }

    /// Deletes an orphaned document. If a record with the id shows up
    /// meanwhile, its document is written back.
    async fn record_removal(&self, id: &TaskId, report: &mut ReconcileReport) {
        tracing::debug!(task_id = %id, "Removing orphaned document");
        let existed = match self.mutator.remove(id).await {
            IndexWriteResult::Removed { existed } => existed,
            IndexWriteResult::Failed { .. } => {
                report.failed += 1;
                return;
            }
            IndexWriteResult::Written => false,
        };
        let state = advance(id, IndexEntryState::Indexed, IndexTransition::DeleteSucceeded);

        match self.repository.find_by_id(id).await {
            Ok(None) => {
                if existed {
                    report.repaired_deletions += 1;
                }
            }
            Ok(Some(task)) => self.repair_entry(task, state, report).await,
            Err(error) => {
                tracing::warn!(task_id = %id, error = %error, "Could not confirm orphan removal");
                self.mutator.defer(id).await;
                report.failed += 1;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Repair Queue
    // -------------------------------------------------------------------------

    async fn drain_pending(&self) -> Result<Vec<TaskId>, ReconcileError> {
        let pending = self.repair_queue().pending().await?;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let limit = usize::try_from(pending).unwrap_or(usize::MAX);
        Ok(self.repair_queue().drain(limit).await?)
    }

    async fn requeue(&self, ids: &[TaskId]) {
        for id in ids {
            self.mutator.defer(id).await;
        }
    }
}

/// Moves an index entry through `transition`. A rejected transition keeps
/// the current state and is logged.
fn advance(task_id: &TaskId, state: IndexEntryState, transition: IndexTransition) -> IndexEntryState {
    match state.apply(transition) {
        Ok(next) => next,
        Err(error) => {
            tracing::error!(task_id = %task_id, error = %error, "Rejected index entry transition");
            state
        }
    }
}
