//! Fail injection for the search index.
//!
//! [`FlakySearchIndex`] wraps any [`SearchIndex`] and can make it fail on
//! demand. It serves two purposes:
//!
//! - drills against a running service (`INDEX_WRITE_FAILURE_RATE`,
//!   `SEARCH_FAILURE_RATE`, `RNG_SEED`), and
//! - tests that need an unreachable, slow or write-failing index, together
//!   with per-operation call counts.
//!
//! Injected failures happen before the wrapped index is called, so a failed
//! write leaves the real index untouched, exactly like a lost request.

use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use siphasher::sip::SipHasher24;
use thiserror::Error;

use crate::domain::{SearchDocument, TaskId};
use crate::infrastructure::{IndexError, SearchHit, SearchIndex};
use crate::search::SearchQuery;

// =============================================================================
// Fail Injection Config
// =============================================================================

/// Probabilities of injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FailInjectionConfig {
    /// Probability that an upsert or delete fails (0.0 - 1.0).
    pub write_failure_rate: f64,
    /// Probability that a search fails (0.0 - 1.0).
    pub search_failure_rate: f64,
    /// Seed for reproducible failure sequences. `None` = OS entropy.
    pub seed: Option<u64>,
}

/// Invalid fail injection settings.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FailInjectionError {
    /// A rate is outside `0.0..=1.0`.
    #[error("Invalid failure rate for {name}: must be 0.0-1.0, got {value}")]
    InvalidFailureRate {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
}

impl FailInjectionConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if a rate is not in range `0.0..=1.0`.
    pub fn validate(&self) -> Result<(), FailInjectionError> {
        for (name, value) in [
            ("INDEX_WRITE_FAILURE_RATE", self.write_failure_rate),
            ("SEARCH_FAILURE_RATE", self.search_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FailInjectionError::InvalidFailureRate { name, value });
            }
        }
        Ok(())
    }

    /// Returns whether any failure is injected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.write_failure_rate > 0.0 || self.search_failure_rate > 0.0
    }
}

// =============================================================================
// RNG Provider
// =============================================================================

/// Draws per-call random numbers, reproducibly when seeded.
///
/// In seeded mode each call gets a child seed derived with `SipHash-2-4`
/// from the parent seed, the operation name and a call sequence number, so
/// concurrent calls do not perturb each other's draws.
#[derive(Debug)]
struct RngProvider {
    parent_seed: Option<u64>,
    sequence: AtomicU64,
}

impl RngProvider {
    const fn new(parent_seed: Option<u64>) -> Self {
        Self {
            parent_seed,
            sequence: AtomicU64::new(0),
        }
    }

    fn draw(&self, operation: &str) -> f64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut rng = match self.parent_seed {
            Some(parent_seed) => {
                let mut hasher = SipHasher24::new_with_key(&[0u8; 16]);
                hasher.write(&parent_seed.to_le_bytes());
                hasher.write(operation.as_bytes());
                hasher.write(b":");
                hasher.write(&sequence.to_le_bytes());
                StdRng::seed_from_u64(hasher.finish())
            }
            None => StdRng::from_os_rng(),
        };
        rng.random()
    }
}

// =============================================================================
// Call Counts
// =============================================================================

/// Number of calls that reached the wrapper, per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCounts {
    /// `upsert` calls.
    pub upserts: u64,
    /// `delete` calls.
    pub deletes: u64,
    /// `get_many` calls.
    pub gets: u64,
    /// `ids_after` calls.
    pub walks: u64,
    /// `search` calls.
    pub searches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    upserts: AtomicU64,
    deletes: AtomicU64,
    gets: AtomicU64,
    walks: AtomicU64,
    searches: AtomicU64,
}

// =============================================================================
// Flaky Search Index
// =============================================================================

/// A [`SearchIndex`] wrapper that injects failures and counts calls.
pub struct FlakySearchIndex {
    inner: Arc<dyn SearchIndex>,
    config: FailInjectionConfig,
    rng: RngProvider,
    unavailable: AtomicBool,
    writes_failing: AtomicBool,
    delay_ms: AtomicU64,
    counters: Counters,
}

impl std::fmt::Debug for FlakySearchIndex {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FlakySearchIndex")
            .field("config", &self.config)
            .field("unavailable", &self.unavailable)
            .field("writes_failing", &self.writes_failing)
            .finish_non_exhaustive()
    }
}

impl FlakySearchIndex {
    /// Wraps `inner` with no failures injected.
    #[must_use]
    pub fn new(inner: Arc<dyn SearchIndex>) -> Self {
        Self::with_config(inner, FailInjectionConfig::default())
    }

    /// Wraps `inner` with rate-based failures.
    #[must_use]
    pub fn with_config(inner: Arc<dyn SearchIndex>, config: FailInjectionConfig) -> Self {
        Self {
            inner,
            rng: RngProvider::new(config.seed),
            config,
            unavailable: AtomicBool::new(false),
            writes_failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Makes every operation fail as if the index were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes upserts and deletes fail while reads keep working.
    pub fn set_writes_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every operation by `delay` before it runs.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Returns the number of calls per operation so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            upserts: self.counters.upserts.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            gets: self.counters.gets.load(Ordering::SeqCst),
            walks: self.counters.walks.load(Ordering::SeqCst),
            searches: self.counters.searches.load(Ordering::SeqCst),
        }
    }

    async fn before(&self, counter: &AtomicU64) -> Result<(), IndexError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("injected: index unreachable".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self, counter: &AtomicU64, operation: &str) -> Result<(), IndexError> {
        self.before(counter).await?;
        if self.writes_failing.load(Ordering::SeqCst)
            || self.rng.draw(operation) < self.config.write_failure_rate
        {
            return Err(IndexError::Unavailable(format!("injected: {operation} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for FlakySearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError> {
        self.before_write(&self.counters.upserts, "upsert").await?;
        self.inner.upsert(document).await
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, IndexError> {
        self.before_write(&self.counters.deletes, "delete").await?;
        self.inner.delete(id).await
    }

    async fn get_many(&self, ids: &[TaskId]) -> Result<Vec<SearchDocument>, IndexError> {
        self.before(&self.counters.gets).await?;
        self.inner.get_many(ids).await
    }

    async fn ids_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskId>, IndexError> {
        self.before(&self.counters.walks).await?;
        self.inner.ids_after(cursor, limit).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        self.before(&self.counters.searches).await?;
        if self.rng.draw("search") < self.config.search_failure_rate {
            return Err(IndexError::Unavailable("injected: search failed".to_string()));
        }
        self.inner.search(query).await
    }

    async fn count(&self) -> Result<u64, IndexError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("injected: index unreachable".to_string()));
        }
        self.inner.count().await
    }
}
