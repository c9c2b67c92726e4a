//! Region Store Module
//!
//! One bounded region of the local tier: an LRU map with TTL expiration.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde_json::Value;

use crate::cache::{CacheEntry, CacheStats};

// == Region ==
/// Logical regions of the store tier. Each is bounded independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Single-entry reads
    Entries,
    /// Filtered list reads
    Lists,
    /// Backend configuration blobs
    Configs,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Entries, Region::Lists, Region::Configs];

    /// Prefix used for this region's keys in the shared tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Entries => "entry",
            Region::Lists => "list",
            Region::Configs => "config",
        }
    }
}

// == Region Store ==
/// LRU-bounded map of cache entries with optional TTL.
#[derive(Debug)]
pub struct RegionStore {
    /// Values in access order
    entries: LruCache<String, CacheEntry>,
    /// Performance statistics
    stats: CacheStats,
    /// TTL in seconds, None = keep forever
    ttl: Option<u64>,
}

impl RegionStore {
    // == Constructor ==
    pub fn new(max_entries: NonZeroUsize, ttl: Option<u64>) -> Self {
        Self {
            entries: LruCache::new(max_entries),
            stats: CacheStats::new(),
            ttl,
        }
    }

    // == Set ==
    /// Stores a value, overwriting and resetting the TTL of an existing key.
    ///
    /// Returns the key dropped to make room, if the region was full.
    pub fn set(&mut self, key: String, value: Value) -> Option<String> {
        let entry = CacheEntry::new(value, self.ttl);
        let evicted = match self.entries.push(key.clone(), entry) {
            Some((old_key, _)) if old_key != key => {
                self.stats.record_eviction();
                Some(old_key)
            }
            _ => None,
        };
        self.stats.set_total_entries(self.entries.len());
        evicted
    }

    // == Get ==
    /// Returns a copy of the value if present and not expired.
    ///
    /// Expired values are dropped and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            self.entries.pop(key);
            self.stats.set_total_entries(self.entries.len());
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        self.entries.get(key).map(CacheEntry::snapshot)
    }

    // == Delete ==
    /// Removes a value. Returns whether anything was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.entries.pop(key).is_some();
        self.stats.set_total_entries(self.entries.len());
        removed
    }

    /// Whether the key is held, expired or not. Does not touch LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    // == Keys ==
    /// Keys currently held, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired values and returns their keys.
    pub fn cleanup_expired(&mut self) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }

        self.stats.set_total_entries(self.entries.len());
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
