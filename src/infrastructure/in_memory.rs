//! In-memory primary store.
//!
//! Suitable for tests and single-process deployments. Writers are serialized
//! by the map's write lock, which is what keeps `version` and `updated_at`
//! monotonic per record.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{NewTask, OwnerId, Task, TaskId, TaskPatch, Timestamp};
use crate::infrastructure::{PaginatedResult, Pagination, RepositoryError, TaskRepository};

// =============================================================================
// In-Memory Task Repository
// =============================================================================

/// In-memory implementation of [`TaskRepository`].
///
/// Tasks are kept in a `BTreeMap` keyed by id so batch walks come out in id
/// order without sorting.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<BTreeMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    /// Creates a new empty in-memory task repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully built task, replacing any task with the same id.
    ///
    /// Bypasses id and timestamp assignment; used to seed fixtures.
    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.task_id, task);
    }
}

/// Newest first, id as the final tie-break.
fn newest_first(left: &Task, right: &Task) -> std::cmp::Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| right.task_id.cmp(&left.task_id))
}

#[async_trait]
#[allow(clippy::significant_drop_tightening)]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, fields: NewTask, owner_id: OwnerId) -> Result<Task, RepositoryError> {
        let task = Task::create(TaskId::generate(), owner_id, fields, Timestamp::now());
        self.tasks.write().await.insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut guard = self.tasks.write().await;
        let Some(current) = guard.get(id) else {
            return Ok(None);
        };
        let updated = current.apply(patch, Timestamp::now());
        guard.insert(*id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list(
        &self,
        owner_scope: Option<OwnerId>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Task>, RepositoryError> {
        let guard = self.tasks.read().await;
        let mut scoped: Vec<&Task> = guard
            .values()
            .filter(|task| owner_scope.is_none_or(|owner| task.is_owned_by(&owner)))
            .collect();
        scoped.sort_by(|left, right| newest_first(left, right));

        let total = scoped.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let items = scoped
            .into_iter()
            .skip(offset)
            .take(pagination.limit() as usize)
            .cloned()
            .collect();

        Ok(PaginatedResult::new(items, total, pagination))
    }

    async fn list_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError> {
        let guard = self.tasks.read().await;
        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(guard
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn find_many(&self, ids: &[TaskId]) -> Result<Vec<Task>, RepositoryError> {
        let guard = self.tasks.read().await;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.tasks.read().await.len() as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================
