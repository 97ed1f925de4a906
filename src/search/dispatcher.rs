//! Index dispatcher: runs index mutations off the request path.
//!
//! Jobs are routed to one of N lanes by a keyed hash of the task id. Each
//! lane applies its jobs one at a time, so all jobs for one task are applied
//! in submission order. A lane also remembers the last version it applied
//! per task and drops anything older, and a delete leaves a tombstone so a
//! late upsert cannot bring the document back.

use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use siphasher::sip::SipHasher13;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{Task, TaskId};
use crate::search::{IndexMutator, IndexWriteResult};

/// Version recorded for deleted tasks. Ids are never reused.
const TOMBSTONE: u64 = u64::MAX;

// =============================================================================
// Configuration
// =============================================================================

/// Lane layout of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of lanes.
    pub lanes: usize,
    /// Queued jobs per lane before submissions overflow to the repair queue.
    pub lane_capacity: usize,
    /// Task versions remembered per lane.
    pub version_memory: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            lane_capacity: 1024,
            version_memory: 10_000,
        }
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// An index mutation to apply after a primary commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    /// Write the projection of a committed record.
    Upsert(Task),
    /// Delete the document of a deleted record.
    Remove(TaskId),
}

impl IndexJob {
    /// Returns the task this job is about.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Upsert(task) => task.task_id,
            Self::Remove(task_id) => *task_id,
        }
    }
}

#[derive(Debug)]
enum LaneMessage {
    Job(IndexJob),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

// =============================================================================
// Lane Worker
// =============================================================================

struct Lane {
    id: usize,
    mutator: IndexMutator,
    versions: LruCache<TaskId, u64>,
}

impl Lane {
    async fn apply(&mut self, job: IndexJob) -> Option<IndexWriteResult> {
        match job {
            IndexJob::Upsert(task) => {
                if let Some(&applied) = self.versions.get(&task.task_id)
                    && task.version <= applied
                {
                    tracing::debug!(
                        lane = self.id,
                        task_id = %task.task_id,
                        version = task.version,
                        applied,
                        "Skipping superseded index job"
                    );
                    return None;
                }
                self.versions.put(task.task_id, task.version);
                Some(self.mutator.upsert(&task).await)
            }
            IndexJob::Remove(task_id) => {
                self.versions.put(task_id, TOMBSTONE);
                Some(self.mutator.remove(&task_id).await)
            }
        }
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<LaneMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                LaneMessage::Job(job) => {
                    let task_id = job.task_id();
                    if let Some(result) = self.apply(job).await {
                        tracing::trace!(lane = self.id, task_id = %task_id, ?result, "Applied index job");
                    }
                }
                LaneMessage::Flush(done) => {
                    let _ = done.send(());
                }
                LaneMessage::Shutdown => break,
            }
        }
        tracing::debug!(lane = self.id, "Index lane stopped");
    }
}

// =============================================================================
// Index Dispatcher
// =============================================================================

/// Hands index jobs to per-task ordered lanes without blocking the caller.
pub struct IndexDispatcher {
    lanes: Vec<mpsc::Sender<LaneMessage>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    mutator: IndexMutator,
    hash_keys: (u64, u64),
}

impl std::fmt::Debug for IndexDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("IndexDispatcher")
            .field("lanes", &self.lanes.len())
            .finish_non_exhaustive()
    }
}

impl IndexDispatcher {
    /// Spawns the lane workers on the current tokio runtime.
    #[must_use]
    pub fn spawn(mutator: IndexMutator, config: DispatcherConfig) -> Self {
        let lane_count = config.lanes.max(1);
        let memory = NonZeroUsize::new(config.version_memory).unwrap_or(NonZeroUsize::MIN);

        let mut lanes = Vec::with_capacity(lane_count);
        let mut workers = Vec::with_capacity(lane_count);
        for id in 0..lane_count {
            let (sender, receiver) = mpsc::channel(config.lane_capacity.max(1));
            let lane = Lane {
                id,
                mutator: mutator.clone(),
                versions: LruCache::new(memory),
            };
            workers.push(tokio::spawn(lane.run(receiver)));
            lanes.push(sender);
        }

        tracing::info!(
            lanes = lane_count,
            lane_capacity = config.lane_capacity,
            "Index dispatcher started"
        );

        Self {
            lanes,
            workers: Mutex::new(workers),
            mutator,
            hash_keys: (rand::random(), rand::random()),
        }
    }

    fn lane_for(&self, task_id: &TaskId) -> usize {
        let mut hasher = SipHasher13::new_with_keys(self.hash_keys.0, self.hash_keys.1);
        hasher.write(task_id.as_uuid().as_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let lane = (hasher.finish() % self.lanes.len() as u64) as usize;
        lane
    }

    /// Queues `job` on its lane.
    ///
    /// Never waits for lane capacity: if the lane is full or stopped, the
    /// task is recorded in the repair queue instead.
    pub async fn submit(&self, job: IndexJob) {
        let task_id = job.task_id();
        let lane = self.lane_for(&task_id);
        if let Err(error) = self.lanes[lane].try_send(LaneMessage::Job(job)) {
            let reason = match error {
                mpsc::error::TrySendError::Full(_) => "lane full",
                mpsc::error::TrySendError::Closed(_) => "lane stopped",
            };
            tracing::warn!(task_id = %task_id, lane, reason, "Index job not queued, deferring to repair");
            self.mutator.defer(&task_id).await;
        }
    }

    /// Waits until every job queued before this call has been applied.
    pub async fn flush(&self) {
        let mut pending = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let (done, wait) = oneshot::channel();
            if lane.send(LaneMessage::Flush(done)).await.is_ok() {
                pending.push(wait);
            }
        }
        for wait in pending {
            let _ = wait.await;
        }
    }

    /// Drains all lanes and stops their workers.
    ///
    /// Jobs submitted afterwards go straight to the repair queue.
    pub async fn shutdown(&self, grace: Duration) {
        for lane in &self.lanes {
            let _ = lane.send(LaneMessage::Shutdown).await;
        }
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        let drained = tokio::time::timeout(grace, futures::future::join_all(workers)).await;
        match drained {
            Ok(_) => tracing::info!("Index dispatcher drained"),
            Err(_) => tracing::warn!(?grace, "Index dispatcher did not drain in time"),
        }
    }
}
