//! Task domain model.
//!
//! This module contains the task record held by the primary store together
//! with the value objects it is built from.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Value Objects - Newtypes
// =============================================================================

/// Unique identifier for a task.
///
/// Ordering follows the UUID bytes, which for v7 identifiers is creation
/// order. Batch walks over the primary store and the index rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a new time-ordered `TaskId` (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

/// Identifier of the user account that owns a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Creates an `OwnerId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generates a random `OwnerId`. Used by tests and fixtures.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A timestamp wrapper for `DateTime<Utc>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    ///
    /// Precision is truncated to microseconds so that values survive a round
    /// trip through `PostgreSQL` and JSON unchanged.
    #[must_use]
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        let micros = datetime.timestamp_micros();
        Self(DateTime::from_timestamp_micros(micros).unwrap_or(datetime))
    }

    /// Returns the inner `DateTime<Utc>`.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the current time as a `Timestamp`.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Returns a timestamp strictly after `self`, preferring `candidate`.
    ///
    /// Used by the stores so `updated_at` is monotonic per record even when
    /// the wall clock stalls or steps backwards.
    #[must_use]
    pub fn successor(self, candidate: Self) -> Self {
        if candidate > self {
            candidate
        } else {
            Self(self.0 + Duration::microseconds(1))
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0.to_rfc3339())
    }
}

// =============================================================================
// Task
// =============================================================================

/// A task as persisted in the primary store.
///
/// The primary store is the source of truth. Every other representation
/// (search documents, notifications, API responses) is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, assigned at creation.
    pub task_id: TaskId,
    /// Title of the task (never empty).
    pub title: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
    /// Owner of the task. Immutable after creation.
    pub owner_id: OwnerId,
    /// Timestamp when the task was created.
    pub created_at: Timestamp,
    /// Timestamp when the task was last updated.
    pub updated_at: Timestamp,
    /// Incremented by the store on every update.
    pub version: u64,
}

impl Task {
    /// Builds a freshly created record from validated fields.
    ///
    /// This is a pure function. The store supplies the id and timestamp.
    #[must_use]
    pub fn create(
        task_id: TaskId,
        owner_id: OwnerId,
        fields: NewTask,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            task_id,
            title: fields.title,
            description: fields.description,
            completed: fields.completed,
            due_date: fields.due_date,
            owner_id,
            created_at: timestamp,
            updated_at: timestamp,
            version: 1,
        }
    }

    /// Returns the record after applying `patch`, bumping version and `updated_at`.
    ///
    /// The owner and creation timestamp are carried over unchanged.
    #[must_use]
    pub fn apply(&self, patch: &TaskPatch, now: Timestamp) -> Self {
        Self {
            task_id: self.task_id,
            title: patch.title.clone().unwrap_or_else(|| self.title.clone()),
            description: patch
                .description
                .clone()
                .unwrap_or_else(|| self.description.clone()),
            completed: patch.completed.unwrap_or(self.completed),
            due_date: patch.due_date.unwrap_or(self.due_date),
            owner_id: self.owner_id,
            created_at: self.created_at,
            updated_at: self.updated_at.successor(now),
            version: self.version + 1,
        }
    }

    /// Returns `true` if `owner_id` owns this task.
    #[must_use]
    pub fn is_owned_by(&self, owner_id: &OwnerId) -> bool {
        &self.owner_id == owner_id
    }
}

/// Validated fields for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Title (already trimmed and validated).
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Initial completion state.
    pub completed: bool,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    /// Creates fields with only a title set.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            due_date: None,
        }
    }

    /// Returns the fields with a description.
    #[must_use]
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    /// Returns the fields with a due date.
    #[must_use]
    pub fn with_due_date(self, due_date: NaiveDate) -> Self {
        Self {
            due_date: Some(due_date),
            ..self
        }
    }
}

/// Validated partial update.
///
/// `None` leaves a field untouched. For the optional fields the inner
/// `Option` is the new value, so `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description (`Some(None)` clears it).
    pub description: Option<Option<String>>,
    /// New completion state.
    pub completed: Option<bool>,
    /// New due date (`Some(None)` clears it).
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    /// Returns a patch that only changes the title.
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Returns a patch that only changes the completion state.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.due_date.is_none()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_task() -> Task {
        Task::create(
            TaskId::generate(),
            OwnerId::generate(),
            NewTask::titled("Buy milk")
                .with_description("Two litres")
                .with_due_date(NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()),
            Timestamp::now(),
        )
    }

    #[rstest]
    fn test_create_sets_defaults() {
        let task = sample_task();
        assert_eq!(task.version, 1);
        assert!(!task.completed);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[rstest]
    fn test_apply_keeps_owner_and_created_at() {
        let task = sample_task();
        let updated = task.apply(&TaskPatch::title("Buy oat milk"), Timestamp::now());

        assert_eq!(updated.title, "Buy oat milk");
        assert_eq!(updated.owner_id, task.owner_id);
        assert_eq!(updated.created_at, task.created_at);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.description, task.description);
    }

    #[rstest]
    fn test_apply_clears_optional_fields() {
        let task = sample_task();
        let patch = TaskPatch {
            description: Some(None),
            due_date: Some(None),
            ..TaskPatch::default()
        };
        assert!(task.due_date.is_some());

        let updated = task.apply(&patch, Timestamp::now());
        assert!(updated.description.is_none());
        assert!(updated.due_date.is_none());
    }

    #[rstest]
    fn test_updated_at_is_monotonic_when_clock_stalls() {
        let task = sample_task();
        let stalled = task.created_at;
        let first = task.apply(&TaskPatch::completed(true), stalled);
        let second = first.apply(&TaskPatch::completed(false), stalled);

        assert!(first.updated_at > task.updated_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[rstest]
    fn test_task_id_round_trips_through_str() {
        let task_id = TaskId::generate();
        let parsed: TaskId = task_id.to_string().parse().unwrap();
        assert_eq!(parsed, task_id);
    }

    #[rstest]
    fn test_empty_patch() {
        assert!(TaskPatch::default().is_empty());
        assert!(!TaskPatch::completed(true).is_empty());
    }
}
