//! Infrastructure module for external services.
//!
//! This module contains the primary task stores, search index clients, the
//! repair queue, event publishing, and the factory that wires them from
//! configuration.

pub mod elasticsearch;
pub mod factory;
pub mod fail_injection;
pub mod in_memory;
pub mod in_memory_index;
pub mod notifier;
pub mod postgres;
pub mod repair_queue;
pub mod repository;
pub mod search_index;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
pub use factory::{
    BackendFactory, Backends, ConfigurationError, ElasticsearchSettings, FactoryError, IndexMode,
    RepairQueueMode, ServiceConfig, ServiceConfigBuilder, StorageMode,
};
pub use fail_injection::{CallCounts, FailInjectionConfig, FailInjectionError, FlakySearchIndex};
pub use in_memory::InMemoryTaskRepository;
pub use in_memory_index::InMemorySearchIndex;
pub use notifier::{BroadcastPublisher, DEFAULT_EVENT_CAPACITY, TaskEventPublisher};
pub use postgres::PostgresTaskRepository;
pub use repair_queue::{
    InMemoryRepairQueue, REPAIR_QUEUE_KEY, RedisRepairQueue, RepairQueue, RepairQueueError,
};
pub use repository::{PaginatedResult, Pagination, RepositoryError, TaskRepository};
pub use search_index::{IndexError, SearchHit, SearchIndex, TASK_INDEX_NAME};
