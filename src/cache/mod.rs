//! Response caching.
//!
//! - [`NamedCache`]: a bounded LRU + TTL cache for one AI operation.
//! - [`with_cache`]: cache-or-compute around a producer call.
//! - [`CacheRegistry`]: one [`NamedCache`] per [`AiOperation`], plus the
//!   aggregated stats report served to operators.
//!
//! Values are stored as [`serde_json::Value`] so a single registry can
//! hold every operation's result type.

pub mod coalesce;
pub mod named;

pub use coalesce::{Cached, InFlight, InFlightGuard, with_cache};
pub use named::{CacheConfig, CacheStats, NamedCache, TopEntry};

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::credits::AiOperation;

/// Default number of top entries listed per operation in a stats report.
pub const DEFAULT_TOP_ENTRIES: usize = 5;

/// Stats for one operation's cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationCacheReport {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub top_entries: Vec<TopEntry>,
}

/// Snapshot of every operation cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsReport {
    pub overall: CacheStats,
    pub operations: BTreeMap<String, OperationCacheReport>,
}

/// One response cache per AI operation.
pub struct CacheRegistry {
    caches: BTreeMap<AiOperation, NamedCache<Value>>,
}

impl CacheRegistry {
    /// Registry using each operation's built-in cache settings.
    pub fn new() -> Self {
        Self::build(AiOperation::default_cache_config)
    }

    /// Registry using the cache settings resolved from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::build(|op| config.cache_config(*op))
    }

    fn build(config_for: impl Fn(&AiOperation) -> CacheConfig) -> Self {
        let caches = AiOperation::ALL
            .iter()
            .map(|op| (*op, NamedCache::new(op.as_str(), config_for(op))))
            .collect();
        Self { caches }
    }

    /// The cache for `operation`.
    pub fn cache(&self, operation: AiOperation) -> &NamedCache<Value> {
        // Every operation is inserted at construction.
        &self.caches[&operation]
    }

    /// Stats for every cache, each with its `top_n` most-hit entries.
    pub fn stats_report(&self, top_n: usize) -> CacheStatsReport {
        let operations: BTreeMap<String, OperationCacheReport> = self
            .caches
            .iter()
            .map(|(op, cache)| {
                (
                    op.as_str().to_string(),
                    OperationCacheReport {
                        stats: cache.stats(),
                        top_entries: cache.top_entries(top_n),
                    },
                )
            })
            .collect();
        let overall = CacheStats::aggregate(operations.values().map(|report| &report.stats));
        CacheStatsReport {
            overall,
            operations,
        }
    }

    /// Empty every cache. Counters are kept.
    pub fn clear_all(&self) {
        for cache in self.caches.values() {
            cache.clear();
        }
    }

    /// Drop expired entries everywhere, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.caches.values().map(NamedCache::purge_expired).sum()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}
