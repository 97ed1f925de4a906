//! Task Search API Library
//!
//! A task management service whose primary store is kept eventually
//! consistent with a full-text search index.
//!
//! - [`domain`]: task records, search documents, requesters, notifications
//! - [`infrastructure`]: primary stores, index clients, repair queue, factory
//! - [`search`]: index mutation, dispatch, query planning, search, reconciliation
//! - [`api`]: HTTP routes, authentication and DTOs

pub mod api;
pub mod domain;
pub mod infrastructure;
pub mod search;
