//! Notifications published after task mutations commit.

use serde::Serialize;

use super::task::{OwnerId, Task, TaskId, Timestamp};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// A task was created.
    Created,
    /// A task was updated.
    Updated,
    /// A task was deleted.
    Deleted,
}

impl TaskEventKind {
    /// Returns the SSE event name for this kind.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Created => "task_created",
            Self::Updated => "task_updated",
            Self::Deleted => "task_deleted",
        }
    }
}

/// A task mutation notification.
///
/// Carries only the identifier and owner; subscribers fetch the record if
/// they need it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    /// What happened.
    pub kind: TaskEventKind,
    /// Affected task.
    pub task_id: TaskId,
    /// Owner of the affected task.
    #[serde(rename = "userId")]
    pub owner_id: OwnerId,
    /// When the notification was produced.
    pub occurred_at: Timestamp,
}

impl TaskEvent {
    /// Creates a notification for `task`.
    #[must_use]
    pub fn for_task(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            kind,
            task_id: task.task_id,
            owner_id: task.owner_id,
            occurred_at: Timestamp::now(),
        }
    }
}
