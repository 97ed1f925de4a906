//! Service configuration and backend factory.
//!
//! Configuration is read from the environment (after `dotenvy` has loaded any
//! `.env` file), validated into [`ServiceConfig`], and turned into concrete
//! backends by [`BackendFactory`].
//!
//! # Environment Variables
//!
//! - `STORAGE_MODE`: `in_memory` (default) | `postgres`
//! - `DATABASE_URL`: `PostgreSQL` connection URL (required when `STORAGE_MODE=postgres`)
//! - `INDEX_MODE`: `in_memory` (default) | `elasticsearch`
//! - `ELASTICSEARCH_NODE`: node URL (required when `INDEX_MODE=elasticsearch`)
//! - `ELASTICSEARCH_USERNAME` / `ELASTICSEARCH_PASSWORD`: basic auth
//! - `REPAIR_QUEUE_MODE`: `in_memory` (default) | `redis`
//! - `REDIS_URL`: Redis connection URL (required when `REPAIR_QUEUE_MODE=redis`)
//! - `JWT_SECRET`: HS256 secret for bearer credentials (required)
//! - `INDEX_WRITE_ATTEMPTS` (3), `INDEX_WRITE_TIMEOUT_MS` (2000),
//!   `SEARCH_TIMEOUT_MS` (3000), `INDEX_LANES` (4), `INDEX_LANE_CAPACITY` (1024),
//!   `RECONCILE_INTERVAL_SECS` (300, 0 disables), `RECONCILE_BATCH_SIZE` (200)
//! - `INDEX_WRITE_FAILURE_RATE`, `SEARCH_FAILURE_RATE`, `RNG_SEED`: fail injection

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use thiserror::Error;

use super::{
    ElasticsearchConfig, ElasticsearchIndex, FailInjectionConfig, FlakySearchIndex,
    InMemoryRepairQueue, InMemorySearchIndex, InMemoryTaskRepository, PostgresTaskRepository,
    RedisRepairQueue, RepairQueue, SearchIndex, TaskRepository,
};

// =============================================================================
// Modes
// =============================================================================

/// Backend of the primary task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Process-local store. Suitable for testing and development.
    #[default]
    InMemory,
    /// `PostgreSQL` storage for production use.
    Postgres,
}

impl FromStr for StorageMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(ConfigurationError::InvalidStorageMode(value.to_string())),
        }
    }
}

/// Backend of the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Process-local inverted index.
    #[default]
    InMemory,
    /// Elasticsearch over HTTP.
    Elasticsearch,
}

impl FromStr for IndexMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "elasticsearch" | "elastic" | "es" => Ok(Self::Elasticsearch),
            _ => Err(ConfigurationError::InvalidIndexMode(value.to_string())),
        }
    }
}

/// Backend of the repair queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairQueueMode {
    /// Process-local set.
    #[default]
    InMemory,
    /// Redis set shared by all instances.
    Redis,
}

impl FromStr for RepairQueueMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigurationError::InvalidRepairQueueMode(value.to_string())),
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors in the service configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Invalid storage mode value.
    #[error("Invalid storage mode: '{0}'. Expected 'in_memory' or 'postgres'")]
    InvalidStorageMode(String),

    /// Invalid index mode value.
    #[error("Invalid index mode: '{0}'. Expected 'in_memory' or 'elasticsearch'")]
    InvalidIndexMode(String),

    /// Invalid repair queue mode value.
    #[error("Invalid repair queue mode: '{0}'. Expected 'in_memory' or 'redis'")]
    InvalidRepairQueueMode(String),

    /// Missing `DATABASE_URL` when storage mode is Postgres.
    #[error("DATABASE_URL environment variable is required when STORAGE_MODE=postgres")]
    MissingDatabaseUrl,

    /// Missing `ELASTICSEARCH_NODE` when index mode is Elasticsearch.
    #[error("ELASTICSEARCH_NODE environment variable is required when INDEX_MODE=elasticsearch")]
    MissingElasticsearchNode,

    /// Missing `REDIS_URL` when repair queue mode is Redis.
    #[error("REDIS_URL environment variable is required when REPAIR_QUEUE_MODE=redis")]
    MissingRedisUrl,

    /// Missing `JWT_SECRET`.
    #[error("JWT_SECRET environment variable is required")]
    MissingJwtSecret,

    /// A variable is set to a value that cannot be used.
    #[error("Invalid value for {name}: {message} (got '{value}')")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Errors that can occur during backend initialization.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    /// Search index client error.
    #[error("Search index error: {0}")]
    SearchIndex(String),

    /// Redis connection error.
    #[error("Redis connection error: {0}")]
    RedisConnection(String),
}

// =============================================================================
// Environment Variable Parsing
// =============================================================================

/// Reads a variable, treating empty or whitespace-only values as unset.
fn env_string(name: &str) -> Result<Option<String>, ConfigurationError> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigurationError::InvalidValue {
            name: name.to_string(),
            value: "<non-UTF-8 value>".to_string(),
            message: "must be valid UTF-8".to_string(),
        }),
    }
}

/// Parses a variable with `FromStr`, returning `None` when unset.
fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)?
        .map(|value| {
            value
                .parse()
                .map_err(|error: T::Err| ConfigurationError::InvalidValue {
                    name: name.to_string(),
                    message: error.to_string(),
                    value,
                })
        })
        .transpose()
}

fn ensure_positive(name: &str, value: u64) -> Result<u64, ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

// =============================================================================
// Service Config
// =============================================================================

/// Connection details of an Elasticsearch node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticsearchSettings {
    /// Node URL.
    pub node: String,
    /// Basic auth user name.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
}

/// Validated service configuration.
///
/// Use [`ServiceConfig::from_env`] in the binary and
/// [`ServiceConfig::builder`] in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Primary store backend.
    pub storage_mode: StorageMode,
    /// Search index backend.
    pub index_mode: IndexMode,
    /// Repair queue backend.
    pub repair_queue_mode: RepairQueueMode,
    /// `PostgreSQL` connection URL.
    pub database_url: Option<String>,
    /// Elasticsearch connection details.
    pub elasticsearch: Option<ElasticsearchSettings>,
    /// Redis connection URL.
    pub redis_url: Option<String>,
    /// HS256 secret for bearer credentials.
    pub jwt_secret: String,
    /// Attempts per index write.
    pub index_write_attempts: u32,
    /// Timeout per index write attempt.
    pub index_write_timeout: Duration,
    /// Timeout per search.
    pub search_timeout: Duration,
    /// Dispatcher lanes.
    pub index_lanes: usize,
    /// Queue capacity per dispatcher lane.
    pub index_lane_capacity: usize,
    /// Interval of scheduled reconciliation; `None` disables it.
    pub reconcile_interval: Option<Duration>,
    /// Batch size of reconciliation walks.
    pub reconcile_batch_size: usize,
    /// Injected index failures.
    pub fail_injection: FailInjectionConfig,
}

impl ServiceConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Creates a configuration from environment variables.
    ///
    /// Unset variables take their defaults; see the module documentation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a variable holds an invalid value or a
    /// URL required by the selected modes is missing.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let elasticsearch = env_string("ELASTICSEARCH_NODE")?
            .map(|node| -> Result<ElasticsearchSettings, ConfigurationError> {
                Ok(ElasticsearchSettings {
                    node,
                    username: env_string("ELASTICSEARCH_USERNAME")?,
                    password: env_string("ELASTICSEARCH_PASSWORD")?,
                })
            })
            .transpose()?;

        let defaults = ServiceConfigBuilder::default();
        let index_write_attempts = match env_parse::<u32>("INDEX_WRITE_ATTEMPTS")? {
            Some(attempts) => {
                ensure_positive("INDEX_WRITE_ATTEMPTS", u64::from(attempts))?;
                attempts
            }
            None => defaults.index_write_attempts,
        };
        let millis = |name: &str, default: Duration| -> Result<Duration, ConfigurationError> {
            env_parse::<u64>(name)?
                .map(|value| ensure_positive(name, value).map(Duration::from_millis))
                .transpose()
                .map(|value| value.unwrap_or(default))
        };
        let count = |name: &str, default: usize| -> Result<usize, ConfigurationError> {
            env_parse::<u64>(name)?
                .map(|value| ensure_positive(name, value).map(to_usize))
                .transpose()
                .map(|value| value.unwrap_or(default))
        };

        let reconcile_interval = match env_parse::<u64>("RECONCILE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => defaults.reconcile_interval,
        };

        let fail_injection = FailInjectionConfig {
            write_failure_rate: env_parse("INDEX_WRITE_FAILURE_RATE")?.unwrap_or(0.0),
            search_failure_rate: env_parse("SEARCH_FAILURE_RATE")?.unwrap_or(0.0),
            seed: env_parse("RNG_SEED")?,
        };

        let config = Self {
            storage_mode: env_parse("STORAGE_MODE")?.unwrap_or_default(),
            index_mode: env_parse("INDEX_MODE")?.unwrap_or_default(),
            repair_queue_mode: env_parse("REPAIR_QUEUE_MODE")?.unwrap_or_default(),
            database_url: env_string("DATABASE_URL")?,
            elasticsearch,
            redis_url: env_string("REDIS_URL")?,
            jwt_secret: env_string("JWT_SECRET")?.ok_or(ConfigurationError::MissingJwtSecret)?,
            index_write_attempts,
            index_write_timeout: millis("INDEX_WRITE_TIMEOUT_MS", defaults.index_write_timeout)?,
            search_timeout: millis("SEARCH_TIMEOUT_MS", defaults.search_timeout)?,
            index_lanes: count("INDEX_LANES", defaults.index_lanes)?,
            index_lane_capacity: count("INDEX_LANE_CAPACITY", defaults.index_lane_capacity)?,
            reconcile_interval,
            reconcile_batch_size: count("RECONCILE_BATCH_SIZE", defaults.reconcile_batch_size)?,
            fail_injection,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if required URLs are missing for the
    /// selected modes, the JWT secret is empty, or a fail injection rate is
    /// out of range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.storage_mode == StorageMode::Postgres && self.database_url.is_none() {
            return Err(ConfigurationError::MissingDatabaseUrl);
        }
        if self.index_mode == IndexMode::Elasticsearch && self.elasticsearch.is_none() {
            return Err(ConfigurationError::MissingElasticsearchNode);
        }
        if self.repair_queue_mode == RepairQueueMode::Redis && self.redis_url.is_none() {
            return Err(ConfigurationError::MissingRedisUrl);
        }
        if self.jwt_secret.is_empty() {
            return Err(ConfigurationError::MissingJwtSecret);
        }
        self.fail_injection
            .validate()
            .map_err(|error| ConfigurationError::InvalidValue {
                name: "fail injection".to_string(),
                value: format!("{:?}", self.fail_injection),
                message: error.to_string(),
            })
    }
}

/// Builder for [`ServiceConfig`], starting from the documented defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfigBuilder {
    storage_mode: StorageMode,
    index_mode: IndexMode,
    repair_queue_mode: RepairQueueMode,
    database_url: Option<String>,
    elasticsearch: Option<ElasticsearchSettings>,
    redis_url: Option<String>,
    jwt_secret: Option<String>,
    index_write_attempts: u32,
    index_write_timeout: Duration,
    search_timeout: Duration,
    index_lanes: usize,
    index_lane_capacity: usize,
    reconcile_interval: Option<Duration>,
    reconcile_batch_size: usize,
    fail_injection: FailInjectionConfig,
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            index_mode: IndexMode::default(),
            repair_queue_mode: RepairQueueMode::default(),
            database_url: None,
            elasticsearch: None,
            redis_url: None,
            jwt_secret: None,
            index_write_attempts: 3,
            index_write_timeout: Duration::from_millis(2000),
            search_timeout: Duration::from_millis(3000),
            index_lanes: 4,
            index_lane_capacity: 1024,
            reconcile_interval: Some(Duration::from_secs(300)),
            reconcile_batch_size: 200,
            fail_injection: FailInjectionConfig::default(),
        }
    }
}

impl ServiceConfigBuilder {
    /// Sets the storage mode.
    #[must_use]
    pub const fn storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Sets the index mode.
    #[must_use]
    pub const fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Sets the repair queue mode.
    #[must_use]
    pub const fn repair_queue_mode(mut self, mode: RepairQueueMode) -> Self {
        self.repair_queue_mode = mode;
        self
    }

    /// Sets the `PostgreSQL` database URL.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the Elasticsearch node without authentication.
    #[must_use]
    pub fn elasticsearch_node(mut self, node: impl Into<String>) -> Self {
        self.elasticsearch = Some(ElasticsearchSettings {
            node: node.into(),
            username: None,
            password: None,
        });
        self
    }

    /// Sets the Redis URL.
    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Sets the JWT secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Sets the attempts per index write.
    #[must_use]
    pub const fn index_write_attempts(mut self, attempts: u32) -> Self {
        self.index_write_attempts = attempts;
        self
    }

    /// Sets the timeout per index write attempt.
    #[must_use]
    pub const fn index_write_timeout(mut self, timeout: Duration) -> Self {
        self.index_write_timeout = timeout;
        self
    }

    /// Sets the search timeout.
    #[must_use]
    pub const fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Sets the dispatcher lane layout.
    #[must_use]
    pub const fn index_lanes(mut self, lanes: usize, capacity: usize) -> Self {
        self.index_lanes = lanes;
        self.index_lane_capacity = capacity;
        self
    }

    /// Sets the reconciliation schedule; `None` disables it.
    #[must_use]
    pub const fn reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Sets the reconciliation batch size.
    #[must_use]
    pub const fn reconcile_batch_size(mut self, batch_size: usize) -> Self {
        self.reconcile_batch_size = batch_size;
        self
    }

    /// Sets the injected index failures.
    #[must_use]
    pub const fn fail_injection(mut self, config: FailInjectionConfig) -> Self {
        self.fail_injection = config;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the configuration is invalid.
    pub fn build(self) -> Result<ServiceConfig, ConfigurationError> {
        let config = ServiceConfig {
            storage_mode: self.storage_mode,
            index_mode: self.index_mode,
            repair_queue_mode: self.repair_queue_mode,
            database_url: self.database_url,
            elasticsearch: self.elasticsearch,
            redis_url: self.redis_url,
            jwt_secret: self.jwt_secret.ok_or(ConfigurationError::MissingJwtSecret)?,
            index_write_attempts: self.index_write_attempts.max(1),
            index_write_timeout: self.index_write_timeout,
            search_timeout: self.search_timeout,
            index_lanes: self.index_lanes.max(1),
            index_lane_capacity: self.index_lane_capacity.max(1),
            reconcile_interval: self.reconcile_interval,
            reconcile_batch_size: self.reconcile_batch_size.max(1),
            fail_injection: self.fail_injection,
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Backend Factory
// =============================================================================

/// Initialized backends, shared across the service as trait objects.
#[derive(Clone)]
pub struct Backends {
    /// Primary task store.
    pub task_repository: Arc<dyn TaskRepository>,
    /// Search index client, constructed once and shared.
    pub search_index: Arc<dyn SearchIndex>,
    /// Repair queue for failed index writes.
    pub repair_queue: Arc<dyn RepairQueue>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Backends")
            .field("task_repository", &"Arc<dyn TaskRepository>")
            .field("search_index", &"Arc<dyn SearchIndex>")
            .field("repair_queue", &"Arc<dyn RepairQueue>")
            .finish()
    }
}

impl Backends {
    /// Creates all-in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            task_repository: Arc::new(InMemoryTaskRepository::new()),
            search_index: Arc::new(InMemorySearchIndex::new()),
            repair_queue: Arc::new(InMemoryRepairQueue::new()),
        }
    }
}

/// Creates backends from a [`ServiceConfig`].
#[derive(Debug, Clone)]
pub struct BackendFactory {
    config: ServiceConfig,
}

impl BackendFactory {
    /// Creates a new factory with the given configuration.
    #[must_use]
    pub const fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration used by this factory.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Creates all backends.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError` if a configured external service cannot be
    /// reached or prepared.
    pub async fn create(&self) -> Result<Backends, FactoryError> {
        let task_repository = self.create_task_repository().await?;
        let search_index = self.create_search_index().await?;
        let repair_queue = self.create_repair_queue()?;

        tracing::info!(
            storage_mode = ?self.config.storage_mode,
            index_mode = ?self.config.index_mode,
            repair_queue_mode = ?self.config.repair_queue_mode,
            "Backends initialized"
        );

        Ok(Backends {
            task_repository,
            search_index,
            repair_queue,
        })
    }

    async fn create_task_repository(&self) -> Result<Arc<dyn TaskRepository>, FactoryError> {
        match self.config.storage_mode {
            StorageMode::InMemory => Ok(Arc::new(InMemoryTaskRepository::new())),
            StorageMode::Postgres => {
                let database_url = self
                    .config
                    .database_url
                    .as_ref()
                    .ok_or(ConfigurationError::MissingDatabaseUrl)?;
                let pool = PgPool::connect(database_url)
                    .await
                    .map_err(|error| FactoryError::DatabaseConnection(error.to_string()))?;
                let repository = PostgresTaskRepository::new(pool);
                repository
                    .ensure_schema()
                    .await
                    .map_err(|error| FactoryError::DatabaseConnection(error.to_string()))?;
                Ok(Arc::new(repository))
            }
        }
    }

    async fn create_search_index(&self) -> Result<Arc<dyn SearchIndex>, FactoryError> {
        let index: Arc<dyn SearchIndex> = match self.config.index_mode {
            IndexMode::InMemory => Arc::new(InMemorySearchIndex::new()),
            IndexMode::Elasticsearch => {
                let settings = self
                    .config
                    .elasticsearch
                    .clone()
                    .ok_or(ConfigurationError::MissingElasticsearchNode)?;
                let index = ElasticsearchIndex::new(ElasticsearchConfig {
                    node: settings.node,
                    username: settings.username,
                    password: settings.password,
                    timeout: self.config.index_write_timeout.max(self.config.search_timeout),
                })
                .map_err(|error| FactoryError::SearchIndex(error.to_string()))?;
                if let Err(error) = index.ensure_index().await {
                    // Writes fail into the repair queue until the node is back.
                    tracing::warn!(error = %error, "Could not prepare search index");
                }
                Arc::new(index)
            }
        };

        if self.config.fail_injection.is_enabled() {
            tracing::warn!(config = ?self.config.fail_injection, "Index fail injection enabled");
            return Ok(Arc::new(FlakySearchIndex::with_config(
                index,
                self.config.fail_injection,
            )));
        }
        Ok(index)
    }

    fn create_repair_queue(&self) -> Result<Arc<dyn RepairQueue>, FactoryError> {
        match self.config.repair_queue_mode {
            RepairQueueMode::InMemory => Ok(Arc::new(InMemoryRepairQueue::new())),
            RepairQueueMode::Redis => {
                let redis_url = self
                    .config
                    .redis_url
                    .as_ref()
                    .ok_or(ConfigurationError::MissingRedisUrl)?;
                let queue = RedisRepairQueue::from_url(redis_url)
                    .map_err(|error| FactoryError::RedisConnection(error.to_string()))?;
                Ok(Arc::new(queue))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
