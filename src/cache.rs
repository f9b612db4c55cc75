//! Backend Query Cache
//!
//! LRU cache of backend query results shared by concurrent evaluations.
//! Supports:
//! - LRU eviction bounded by entry count
//! - Single-flight: at most one computation per key runs at a time, later
//!   callers block until the leader finishes and receive its outcome
//! - Failed computations are never cached; waiters get a clone of the error
//!
//! Cached values are shared through `Arc`. Callers that mutate a result must
//! clone it first.

use crate::backend::RawSeries;
use crate::error::BackendError;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared query result
pub type CachedSeries = Arc<Vec<RawSeries>>;

type Outcome = Result<CachedSeries, BackendError>;

// ============================================================================
// Cache Configuration
// ============================================================================

/// Query cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries (default: 1,000)
    pub max_entries: usize,

    /// Look up and store responses (default: true)
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Cap the number of cached responses
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    /// Disable caching; every lookup computes
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: AtomicU64,

    /// Lookups that ran the computation
    pub misses: AtomicU64,

    /// Lookups that waited on another caller's computation
    pub coalesced: AtomicU64,

    /// Entries dropped to make room
    pub evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that ran the computation
    pub misses: u64,
    /// Lookups that waited on another caller's computation
    pub coalesced: u64,
    /// Entries dropped to make room
    pub evictions: u64,
}

impl CacheStats {
    /// Copy the counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// In-flight computations
// ============================================================================

/// Outcome slot for one running computation
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Flight {
    fn publish(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

struct Inner {
    entries: LruCache<String, CachedSeries>,
    in_flight: HashMap<String, Arc<Flight>>,
}

/// Removes the in-flight record and wakes waiters even if the leader unwinds
struct LeaderGuard<'a> {
    cache: &'a QueryCache,
    key: &'a str,
    flight: Arc<Flight>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, outcome: Outcome) -> Outcome {
        {
            let mut inner = self.cache.inner.lock();
            inner.in_flight.remove(self.key);
            if let Ok(value) = &outcome {
                if let Some((evicted, _)) =
                    inner.entries.push(self.key.to_string(), value.clone())
                {
                    if evicted != self.key {
                        self.cache.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        self.flight.publish(outcome.clone());
        self.finished = true;
        outcome
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.inner.lock().in_flight.remove(self.key);
            self.flight.publish(Err(BackendError::QueryFailed(format!(
                "computation for {} did not complete",
                self.key
            ))));
        }
    }
}

// ============================================================================
// Query Cache
// ============================================================================

/// LRU cache for backend query results with single-flight computation
pub struct QueryCache {
    config: CacheConfig,

    inner: Mutex<Inner>,

    stats: CacheStats,
}

impl QueryCache {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            stats: CacheStats::default(),
        }
    }

    /// Return the cached value for `key`, computing it at most once
    ///
    /// If another caller is already computing `key`, block until it finishes
    /// and return its outcome.
    pub fn get<F>(&self, key: &str, compute: F) -> Result<CachedSeries, BackendError>
    where
        F: FnOnce() -> Result<Vec<RawSeries>, BackendError>,
    {
        if !self.config.enabled {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return compute().map(Arc::new);
        }

        let flight = {
            let mut inner = self.inner.lock();
            if let Some(value) = inner.entries.get(key) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "query cache hit");
                return Ok(value.clone());
            }
            if let Some(flight) = inner.in_flight.get(key) {
                let flight = flight.clone();
                drop(inner);
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key, "waiting on in-flight query");
                return flight.wait();
            }
            let flight = Arc::new(Flight::default());
            inner.in_flight.insert(key.to_string(), flight.clone());
            flight
        };

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "query cache miss");
        let guard = LeaderGuard {
            cache: self,
            key,
            flight,
            finished: false,
        };
        let outcome = compute().map(Arc::new);
        guard.finish(outcome)
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Number of cached entries
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Fraction of lookups answered from stored responses
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Cache shared between evaluations
pub type SharedQueryCache = Arc<QueryCache>;

// ============================================================================
// Tests
// ============================================================================
