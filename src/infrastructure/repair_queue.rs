//! Repair queue: task ids whose index write failed and await reconciliation.
//!
//! The queue is a set, so marking an id twice repairs it once. Draining
//! removes the returned ids; the reconciler re-marks any it cannot repair.
//!
//! # Key Design
//!
//! - Redis backend: `tasks:index:repair` -> SET of task ids

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::TaskId;

/// Redis key holding the set of ids awaiting repair.
pub const REPAIR_QUEUE_KEY: &str = "tasks:index:repair";

/// Errors that can occur while using the repair queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepairQueueError {
    /// The backing store could not be reached or failed the command.
    #[error("Repair queue unavailable: {0}")]
    Unavailable(String),

    /// A stored entry is not a valid task id.
    #[error("Corrupt repair queue entry: {0}")]
    CorruptEntry(String),
}

/// Set of task ids awaiting index repair.
#[async_trait]
pub trait RepairQueue: Send + Sync {
    /// Marks `id` for repair.
    async fn mark(&self, id: &TaskId) -> Result<(), RepairQueueError>;

    /// Removes and returns up to `limit` marked ids.
    async fn drain(&self, limit: usize) -> Result<Vec<TaskId>, RepairQueueError>;

    /// Number of ids currently marked.
    async fn pending(&self) -> Result<u64, RepairQueueError>;
}

// =============================================================================
// In-Memory Repair Queue
// =============================================================================

/// Process-local repair queue. Entries are lost on restart; the scheduled
/// full reconciliation still finds the drift they pointed at.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepairQueue {
    entries: Arc<Mutex<BTreeSet<TaskId>>>,
}

impl InMemoryRepairQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `id` is marked.
    pub async fn contains(&self, id: &TaskId) -> bool {
        self.entries.lock().await.contains(id)
    }
}

#[async_trait]
impl RepairQueue for InMemoryRepairQueue {
    async fn mark(&self, id: &TaskId) -> Result<(), RepairQueueError> {
        self.entries.lock().await.insert(*id);
        Ok(())
    }

    async fn drain(&self, limit: usize) -> Result<Vec<TaskId>, RepairQueueError> {
        let mut guard = self.entries.lock().await;
        let drained: Vec<TaskId> = guard.iter().take(limit).copied().collect();
        for id in &drained {
            guard.remove(id);
        }
        Ok(drained)
    }

    async fn pending(&self) -> Result<u64, RepairQueueError> {
        Ok(self.entries.lock().await.len() as u64)
    }
}

// =============================================================================
// Redis Repair Queue
// =============================================================================

/// Repair queue persisted in a Redis set, shared by all service instances.
#[derive(Clone)]
pub struct RedisRepairQueue {
    pool: Pool,
}

impl std::fmt::Debug for RedisRepairQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RedisRepairQueue")
            .field("key", &REPAIR_QUEUE_KEY)
            .finish_non_exhaustive()
    }
}

impl RedisRepairQueue {
    /// Creates a queue over an existing connection pool.
    #[must_use]
    pub const fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a queue from a Redis URL.
    ///
    /// # Errors
    ///
    /// Returns [`RepairQueueError::Unavailable`] if the pool cannot be created.
    pub fn from_url(redis_url: &str) -> Result<Self, RepairQueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|error| RepairQueueError::Unavailable(error.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, RepairQueueError> {
        self.pool
            .get()
            .await
            .map_err(|error| RepairQueueError::Unavailable(error.to_string()))
    }
}

#[async_trait]
impl RepairQueue for RedisRepairQueue {
    async fn mark(&self, id: &TaskId) -> Result<(), RepairQueueError> {
        let mut connection = self.connection().await?;
        let _: i64 = connection
            .sadd(REPAIR_QUEUE_KEY, id.to_string())
            .await
            .map_err(|error| RepairQueueError::Unavailable(error.to_string()))?;
        Ok(())
    }

    async fn drain(&self, limit: usize) -> Result<Vec<TaskId>, RepairQueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut connection = self.connection().await?;
        let members: Vec<String> = redis::cmd("SPOP")
            .arg(REPAIR_QUEUE_KEY)
            .arg(limit)
            .query_async(&mut connection)
            .await
            .map_err(|error| RepairQueueError::Unavailable(error.to_string()))?;

        members
            .into_iter()
            .map(|member| {
                member
                    .parse()
                    .map_err(|_| RepairQueueError::CorruptEntry(member))
            })
            .collect()
    }

    async fn pending(&self) -> Result<u64, RepairQueueError> {
        let mut connection = self.connection().await?;
        connection
            .scard(REPAIR_QUEUE_KEY)
            .await
            .map_err(|error| RepairQueueError::Unavailable(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn test_marking_twice_queues_once() {
        let queue = InMemoryRepairQueue::new();
        let id = TaskId::generate();

        queue.mark(&id).await.unwrap();
        queue.mark(&id).await.unwrap();

        assert_eq!(queue.pending().await.unwrap(), 1);
        assert!(queue.contains(&id).await);
    }

    #[rstest]
    #[tokio::test]
    async fn test_drain_respects_limit_and_removes() {
        let queue = InMemoryRepairQueue::new();
        for _ in 0..3 {
            queue.mark(&TaskId::generate()).await.unwrap();
        }

        let first = queue.drain(2).await.unwrap();
        let rest = queue.drain(10).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    #[ignore = "Requires Redis instance"]
    async fn test_redis_queue_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap();
        let queue = RedisRepairQueue::from_url(&url).unwrap();
        let id = TaskId::generate();

        queue.mark(&id).await.unwrap();
        let drained = queue.drain(1000).await.unwrap();

        assert!(drained.contains(&id));
    }
}
