//! Search documents: the denormalized projection of a task held by the index.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::task::{OwnerId, Task, TaskId, Timestamp};

/// Denormalized projection of a [`Task`] stored in the search index.
///
/// A document with id `X` converges to `SearchDocument::from(&task_x)`, or is
/// absent when task `X` does not exist. The index is never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    /// Identifier of the projected task.
    #[serde(rename = "id")]
    pub task_id: TaskId,
    /// Title of the task.
    pub title: String,
    /// Description of the task.
    pub description: Option<String>,
    /// Completion state.
    pub completed: bool,
    /// Due date.
    pub due_date: Option<NaiveDate>,
    /// Owner used for search scoping.
    #[serde(rename = "userId")]
    pub owner_id: OwnerId,
    /// Creation timestamp, used as the ranking tie-break.
    pub created_at: Timestamp,
}

impl From<&Task> for SearchDocument {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            title: task.title.clone(),
            description: task.description.clone(),
            completed: task.completed,
            due_date: task.due_date,
            owner_id: task.owner_id,
            created_at: task.created_at,
        }
    }
}

impl SearchDocument {
    /// Returns `true` if this document matches the projection of `task`.
    #[must_use]
    pub fn is_current_for(&self, task: &Task) -> bool {
        self.task_id == task.task_id
            && self.title == task.title
            && self.description == task.description
            && self.completed == task.completed
            && self.due_date == task.due_date
            && self.owner_id == task.owner_id
            && self.created_at == task.created_at
    }
}

// =============================================================================
// Index Entry State
// =============================================================================

/// Bookkeeping state of a single record's index entry.
///
/// `Stale` is never exposed to search callers; a stale document is still
/// served with its outdated fields until it is repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexEntryState {
    /// No document exists for the record.
    Absent,
    /// The document matches the record.
    Indexed,
    /// The document exists but reflects an older version of the record.
    Stale,
}

/// Events that move an index entry between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexTransition {
    /// An upsert (inline, retried or reconciled) succeeded.
    UpsertSucceeded,
    /// A delete succeeded.
    DeleteSucceeded,
    /// A primary update committed but its index write failed.
    UpdateWriteFailed,
    /// The record moved to a newer version after its document was written.
    RecordChanged,
}

/// Error returned for a transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid index entry transition {transition:?} from {from:?}")]
pub struct InvalidTransition {
    /// State the entry was in.
    pub from: IndexEntryState,
    /// Rejected transition.
    pub transition: IndexTransition,
}

impl IndexEntryState {
    /// Applies `transition`, rejecting anything outside
    /// `ABSENT → INDEXED → {ABSENT, STALE}` and `STALE → INDEXED`.
    ///
    /// Re-upserting an indexed entry and deleting an absent one are accepted
    /// as no-ops, since both index operations are idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any other combination.
    pub const fn apply(self, transition: IndexTransition) -> Result<Self, InvalidTransition> {
        match (self, transition) {
            (_, IndexTransition::UpsertSucceeded) => Ok(Self::Indexed),
            (Self::Indexed | Self::Absent, IndexTransition::DeleteSucceeded) => Ok(Self::Absent),
            (
                Self::Indexed,
                IndexTransition::UpdateWriteFailed | IndexTransition::RecordChanged,
            ) => Ok(Self::Stale),
            (from, transition) => Err(InvalidTransition { from, transition }),
        }
    }

    /// Classifies the index entry of an existing record.
    ///
    /// Orphaned documents (no record) are not covered here; they are found by
    /// walking the index and are removed rather than refreshed.
    #[must_use]
    pub fn classify(task: &Task, document: Option<&SearchDocument>) -> Self {
        match document {
            None => Self::Absent,
            Some(document) if document.is_current_for(task) => Self::Indexed,
            Some(_) => Self::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskPatch};
    use rstest::rstest;

    fn sample_task() -> Task {
        Task::create(
            TaskId::generate(),
            OwnerId::generate(),
            NewTask::titled("Write report"),
            Timestamp::now(),
        )
    }

    #[rstest]
    fn test_document_projection_is_current() {
        let task = sample_task();
        let document = SearchDocument::from(&task);
        assert!(document.is_current_for(&task));
    }

    #[rstest]
    fn test_completion_change_makes_document_stale() {
        let task = sample_task();
        let document = SearchDocument::from(&task);
        let updated = task.apply(&TaskPatch::completed(true), Timestamp::now());

        assert_eq!(
            IndexEntryState::classify(&updated, Some(&document)),
            IndexEntryState::Stale
        );
    }

    #[rstest]
    fn test_updated_at_only_change_is_not_stale() {
        let task = sample_task();
        let document = SearchDocument::from(&task);
        let touched = task.apply(&TaskPatch::default(), Timestamp::now());

        assert_eq!(
            IndexEntryState::classify(&touched, Some(&document)),
            IndexEntryState::Indexed
        );
    }

    #[rstest]
    fn test_document_serializes_with_wire_names() {
        let task = sample_task();
        let value = serde_json::to_value(SearchDocument::from(&task)).unwrap();

        assert!(value.get("id").is_some());
        assert!(value.get("userId").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("dueDate").is_some());
    }

    #[rstest]
    #[case(IndexEntryState::Absent, IndexTransition::UpsertSucceeded, IndexEntryState::Indexed)]
    #[case(IndexEntryState::Indexed, IndexTransition::DeleteSucceeded, IndexEntryState::Absent)]
    #[case(IndexEntryState::Indexed, IndexTransition::UpdateWriteFailed, IndexEntryState::Stale)]
    #[case(IndexEntryState::Indexed, IndexTransition::RecordChanged, IndexEntryState::Stale)]
    #[case(IndexEntryState::Stale, IndexTransition::UpsertSucceeded, IndexEntryState::Indexed)]
    #[case(IndexEntryState::Indexed, IndexTransition::UpsertSucceeded, IndexEntryState::Indexed)]
    #[case(IndexEntryState::Absent, IndexTransition::DeleteSucceeded, IndexEntryState::Absent)]
    fn test_valid_transitions(
        #[case] from: IndexEntryState,
        #[case] transition: IndexTransition,
        #[case] expected: IndexEntryState,
    ) {
        assert_eq!(from.apply(transition), Ok(expected));
    }

    #[rstest]
    #[case(IndexEntryState::Absent, IndexTransition::UpdateWriteFailed)]
    #[case(IndexEntryState::Stale, IndexTransition::DeleteSucceeded)]
    #[case(IndexEntryState::Stale, IndexTransition::UpdateWriteFailed)]
    #[case(IndexEntryState::Absent, IndexTransition::RecordChanged)]
    fn test_invalid_transitions(
        #[case] from: IndexEntryState,
        #[case] transition: IndexTransition,
    ) {
        assert_eq!(
            from.apply(transition),
            Err(InvalidTransition { from, transition })
        );
    }
}
