//! Domain module for task management.
//!
//! This module contains the task record, its search projection, the
//! requester model used for owner scoping, and mutation notifications.

pub mod document;
pub mod event;
pub mod requester;
pub mod task;

pub use document::{IndexEntryState, IndexTransition, InvalidTransition, SearchDocument};
pub use event::{TaskEvent, TaskEventKind};
pub use requester::{AccountType, Requester};
pub use task::{NewTask, OwnerId, Task, TaskId, TaskPatch, Timestamp};
