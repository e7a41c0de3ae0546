//! Bounded per-operation response cache.
//!
//! [`NamedCache`] stores results for one AI operation, keyed by
//! [`Fingerprint`]. Entries expire after a TTL and, once the cache is full,
//! the least-recently-used entry is evicted to make room for a new key.
//!
//! # Capacity
//!
//! `len() <= max_entries` holds after every operation, including under
//! concurrent `put`s. Each entry also carries a hit count, reported by
//! [`top_entries()`](NamedCache::top_entries). Recency order is kept by an
//! [`LruCache`] sized to `max_entries`.
//!
//! # Concurrency
//!
//! Every operation takes the cache's single mutex for a short, non-async
//! critical section. The lock is never held across an `.await`. A poisoned
//! lock drops all entries and carries on; lookups after that are misses.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, warn};

use super::coalesce::InFlight;
use crate::key::Fingerprint;
use crate::telemetry;

/// Configuration for a [`NamedCache`].
///
/// ```rust
/// # use vellum::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(200)
///     .ttl(Duration::from_secs(3600))
///     .cost_per_miss(0.004);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 500.
    pub max_entries: usize,
    /// Time-to-live for cached entries. Default: 24 hours.
    pub ttl: Duration,
    /// Estimated cost (USD) of one producer invocation. Reporting only.
    pub cost_per_miss: f64,
    /// Share one producer call between concurrent requests for the same
    /// key. Default: off.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: Duration::from_secs(24 * 3600),
            cost_per_miss: 0.0,
            single_flight: false,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the estimated cost of a cache miss.
    pub fn cost_per_miss(mut self, cost: f64) -> Self {
        self.cost_per_miss = cost;
        self
    }

    /// Enable or disable in-flight de-duplication.
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

/// Aggregate counters for one cache (or a sum across caches).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    /// `misses × cost_per_miss`.
    pub estimated_savings: f64,
}

impl CacheStats {
    fn new(hits: u64, misses: u64, size: usize, max_size: usize, savings: f64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
            size,
            max_size,
            estimated_savings: savings,
        }
    }

    /// Sum several caches' stats, recomputing the hit rate from the totals.
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> Self {
        let (hits, misses, size, max_size, savings) = stats.into_iter().fold(
            (0, 0, 0, 0, 0.0),
            |(h, m, s, ms, sv), st| {
                (
                    h + st.hits,
                    m + st.misses,
                    s + st.size,
                    ms + st.max_size,
                    sv + st.estimated_savings,
                )
            },
        );
        Self::new(hits, misses, size, max_size, savings)
    }
}

/// Introspection record for a frequently-hit entry. Never carries the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopEntry {
    pub fingerprint: Fingerprint,
    pub hit_count: u64,
    pub age_secs: u64,
    /// `None` when the entry has no reachable expiry.
    pub expires_in_secs: Option<u64>,
}

struct Slot<V> {
    value: V,
    created_at: Instant,
    expires_at: Option<Instant>,
    hit_count: u64,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Missing,
}

struct Inner<V> {
    entries: LruCache<Fingerprint, Slot<V>>,
    hits: u64,
    misses: u64,
}

impl<V: Clone> Inner<V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn lookup(&mut self, key: &Fingerprint, now: Instant) -> Lookup<V> {
        let expired = match self.entries.peek(key) {
            Some(slot) => slot.is_expired(now),
            None => {
                self.misses += 1;
                return Lookup::Missing;
            }
        };
        if expired {
            self.entries.pop(key);
            self.misses += 1;
            return Lookup::Expired;
        }

        // `get_mut` promotes the entry to most-recently-used.
        let Some(slot) = self.entries.get_mut(key) else {
            self.misses += 1;
            return Lookup::Missing;
        };
        slot.hit_count += 1;
        self.hits += 1;
        Lookup::Hit(slot.value.clone())
    }
}

/// Bounded LRU + TTL cache for one AI operation.
///
/// Thread-safe; share it behind an `Arc`. See the module docs for the
/// eviction and locking model.
pub struct NamedCache<V> {
    name: String,
    config: CacheConfig,
    inner: Mutex<Inner<V>>,
    in_flight: Option<InFlight>,
}

impl<V: Clone> NamedCache<V> {
    /// Create an empty cache. `name` labels logs and metrics.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        let in_flight = config.single_flight.then(InFlight::new);
        // Zero-capacity caches never insert; the backing map still needs a
        // non-zero bound.
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new(capacity)),
            in_flight,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The in-flight registry, when single-flight is enabled.
    pub(crate) fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Look up a live entry.
    ///
    /// A hit bumps the entry's hit count and recency. An expired entry is
    /// removed and counts as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let lookup = self.lock().lookup(key, Instant::now());
        match lookup {
            Lookup::Hit(value) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => self.name.clone())
                    .increment(1);
                Some(value)
            }
            Lookup::Expired => {
                debug!(operation = %self.name, key = %key.short(), "expired entry removed");
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => self.name.clone())
                    .increment(1);
                None
            }
            Lookup::Missing => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => self.name.clone())
                    .increment(1);
                None
            }
        }
    }

    /// Insert with the configured TTL.
    pub fn put(&self, key: Fingerprint, value: V) {
        self.put_with_ttl(key, value, self.config.ttl);
    }

    /// Insert (or overwrite) an entry with an explicit TTL.
    ///
    /// When the cache is full and `key` is new, the least-recently-used
    /// entry is evicted first. A zero-capacity cache stores nothing.
    pub fn put_with_ttl(&self, key: Fingerprint, value: V, ttl: Duration) {
        if self.config.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        let slot = Slot {
            value,
            created_at: now,
            expires_at: now.checked_add(ttl),
            hit_count: 0,
        };
        // `push` hands back either the overwritten slot for `key` or the
        // least-recently-used entry it displaced.
        let evicted = match self.lock().entries.push(key, slot) {
            Some((displaced, _)) if displaced != key => Some(displaced),
            _ => None,
        };

        if let Some(victim) = evicted {
            debug!(operation = %self.name, key = %victim.short(), "evicted least-recently-used entry");
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "operation" => self.name.clone())
                .increment(1);
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &Fingerprint) -> bool {
        self.lock().entries.pop(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        expired.len()
    }

    /// Number of stored entries (expired entries not yet removed included).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats::new(
            inner.hits,
            inner.misses,
            inner.entries.len(),
            self.config.max_entries,
            inner.misses as f64 * self.config.cost_per_miss,
        )
    }

    /// The `n` live entries with the highest hit counts, most-hit first.
    ///
    /// Read-only: recency and counters are untouched.
    pub fn top_entries(&self, n: usize) -> Vec<TopEntry> {
        let now = Instant::now();
        let inner = self.lock();
        let mut top: Vec<TopEntry> = inner
            .entries
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .map(|(key, slot)| TopEntry {
                fingerprint: *key,
                hit_count: slot.hit_count,
                age_secs: now.duration_since(slot.created_at).as_secs(),
                expires_in_secs: slot
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_secs()),
            })
            .collect();
        drop(inner);

        top.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        top.truncate(n);
        top
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(operation = %self.name, "cache lock poisoned, dropping all entries");
                let mut guard = poisoned.into_inner();
                guard.entries.clear();
                self.inner.clear_poison();
                guard
            }
        }
    }
}
