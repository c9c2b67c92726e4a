//! Cache Statistics Module
//!
//! Per-region counters plus the aggregate report returned by `get_stats`.

use serde::Serialize;

// == Region Stats ==
/// Counters for one store region.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the region
    pub hits: u64,
    /// Lookups that found nothing or an expired value
    pub misses: u64,
    /// Values dropped by the LRU bound
    pub evictions: u64,
    /// Current number of values in the region
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// hits / (hits + misses), or 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }

    /// Folds another region's counters into this one.
    pub fn absorb(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.total_entries += other.total_entries;
    }
}

// == Stats Report ==
/// Snapshot of the whole cache, as exposed by `DmCache::get_stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    /// Per-region maximum number of values
    pub max_cache_size: usize,
    /// TTL in seconds, 0 when values are kept forever
    pub time_to_live: u64,
    pub items_in_entry_cache: usize,
    pub items_in_model_cache: usize,
    pub items_in_config_cache: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    /// Whether change events currently keep the cache fresh
    pub live_invalidation: bool,
}
