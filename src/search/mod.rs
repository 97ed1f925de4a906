//! Search indexing and query consistency.
//!
//! - [`planner`]: free text into scoped, ranked queries
//! - [`mutator`]: record changes into index writes, with bounded retries
//! - [`dispatcher`]: per-task ordered lanes that run the mutator off the
//!   request path
//! - [`service`]: search execution, authorization and result shaping
//! - [`reconciler`]: drift detection and repair

pub mod dispatcher;
pub mod error;
pub mod mutator;
pub mod planner;
pub mod reconciler;
pub mod service;

pub use dispatcher::{DispatcherConfig, IndexDispatcher, IndexJob};
pub use error::SearchError;
pub use mutator::{IndexMutator, IndexWriteResult, RetryPolicy};
pub use planner::{QueryPlanner, SearchQuery, normalize_query};
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler};
pub use service::{SearchService, TaskSearchResult};
