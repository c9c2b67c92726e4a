//! Store Tier Module
//!
//! Combines the local regions with the optional shared tier. Reads prefer the
//! local region and fall through to the shared tier, repopulating locally on a
//! shared hit. Writes and deletes fan out to both.

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, RedisStore, Region, RegionStore, SharedTier};
use crate::config::ExternalStoreConfig;
use crate::error::{CacheError, Result};
use crate::index::IdentityIndex;

// == Tier Stats ==
/// Capacity, TTL, and per-region counters.
#[derive(Debug, Clone)]
pub struct TierStats {
    pub capacity: usize,
    /// TTL in seconds, None = forever
    pub ttl: Option<u64>,
    pub entries: CacheStats,
    pub lists: CacheStats,
    pub configs: CacheStats,
}

impl TierStats {
    pub fn totals(&self) -> CacheStats {
        let mut total = CacheStats::new();
        total.absorb(&self.entries);
        total.absorb(&self.lists);
        total.absorb(&self.configs);
        total
    }
}

// == Lookup ==
/// Outcome of a tier read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Served by the local region
    Local(Value),
    /// Served by the shared tier and copied into the local region, which
    /// may have evicted keys to make room
    Shared { value: Value, evicted: Vec<String> },
    Miss,
}

impl Lookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Local(value) | Lookup::Shared { value, .. } => Some(value),
            Lookup::Miss => None,
        }
    }
}

// == Store Tier ==
pub struct StoreTier {
    entries: RwLock<RegionStore>,
    lists: RwLock<RegionStore>,
    configs: RwLock<RegionStore>,
    /// Taken out on close
    shared: SyncRwLock<Option<Arc<dyn SharedTier>>>,
    capacity: usize,
    ttl: Option<u64>,
}

impl StoreTier {
    /// Creates a local-only tier.
    ///
    /// `ttl` of None keeps values until evicted.
    pub fn local(capacity: usize, ttl: Option<u64>) -> Result<Self> {
        let max = NonZeroUsize::new(capacity).ok_or_else(|| {
            CacheError::Configuration("cacheSize must be greater than 0".to_string())
        })?;

        Ok(Self {
            entries: RwLock::new(RegionStore::new(max, ttl)),
            lists: RwLock::new(RegionStore::new(max, ttl)),
            configs: RwLock::new(RegionStore::new(max, ttl)),
            shared: SyncRwLock::new(None),
            capacity,
            ttl,
        })
    }

    /// Creates a tier, connecting the shared store when one is configured.
    pub async fn new(
        capacity: usize,
        ttl: Option<u64>,
        external: Option<&ExternalStoreConfig>,
    ) -> Result<Self> {
        let tier = Self::local(capacity, ttl)?;
        let Some(external) = external else {
            return Ok(tier);
        };

        let Some(ttl) = ttl else {
            return Err(CacheError::Configuration(
                "timeToLive 0 (cache forever) cannot be combined with an external store".to_string(),
            ));
        };

        let shared = RedisStore::connect(external, ttl).await?;
        *tier.shared.write() = Some(Arc::new(shared));
        Ok(tier)
    }

    /// Creates a tier over an already connected shared store.
    pub fn with_shared(
        capacity: usize,
        ttl: Option<u64>,
        shared: Arc<dyn SharedTier>,
    ) -> Result<Self> {
        let tier = Self::local(capacity, ttl)?;
        *tier.shared.write() = Some(shared);
        Ok(tier)
    }

    fn region(&self, region: Region) -> &RwLock<RegionStore> {
        match region {
            Region::Entries => &self.entries,
            Region::Lists => &self.lists,
            Region::Configs => &self.configs,
        }
    }

    fn shared(&self) -> Option<Arc<dyn SharedTier>> {
        self.shared.read().clone()
    }

    pub fn has_shared(&self) -> bool {
        self.shared.read().is_some()
    }

    // == Get ==
    /// Looks a key up, returning a copy of the cached value.
    pub async fn get(&self, region: Region, key: &str) -> Lookup {
        if let Some(value) = self.region(region).write().await.get(key) {
            return Lookup::Local(value);
        }

        let Some(shared) = self.shared() else {
            return Lookup::Miss;
        };
        match shared.get(region, key).await {
            Ok(Some(value)) => {
                debug!(key, region = region.as_str(), "shared tier hit, repopulating local");
                let evicted = self
                    .region(region)
                    .write()
                    .await
                    .set(key.to_string(), value.clone());
                Lookup::Shared {
                    value,
                    evicted: evicted.into_iter().collect(),
                }
            }
            Ok(None) => Lookup::Miss,
            Err(err) => {
                warn!(key, error = %err, "shared tier read failed");
                Lookup::Miss
            }
        }
    }

    // == Put ==
    /// Stores a value and returns the keys the local region evicted for it.
    pub async fn put(&self, region: Region, key: &str, value: Value) -> Vec<String> {
        if let Some(shared) = self.shared() {
            if let Err(err) = shared.put(region, key, &value).await {
                warn!(key, error = %err, "shared tier write failed");
            }
        }

        let evicted = self.region(region).write().await.set(key.to_string(), value);
        evicted.into_iter().collect()
    }

    // == Delete ==
    pub async fn delete(&self, region: Region, key: &str) -> bool {
        if let Some(shared) = self.shared() {
            if let Err(err) = shared.delete(region, key).await {
                warn!(key, error = %err, "shared tier delete failed");
            }
        }

        self.region(region).write().await.delete(key)
    }

    /// Deletes every key and returns how many were held locally.
    pub async fn delete_many(&self, region: Region, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.delete(region, key).await {
                removed += 1;
            }
        }
        removed
    }

    // == Forget Absent ==
    /// Drops from `index` those of `keys` the region no longer holds and
    /// returns how many were forgotten.
    ///
    /// Runs under the region's write lock, so a key re-stored by a concurrent
    /// read stays indexed.
    pub async fn forget_absent(&self, region: Region, keys: &[String], index: &IdentityIndex) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let store = self.region(region).write().await;
        let absent: Vec<String> = keys
            .iter()
            .filter(|key| !store.contains(key.as_str()))
            .cloned()
            .collect();
        index.forget(region, &absent)
    }

    pub async fn keys(&self, region: Region) -> Vec<String> {
        self.region(region).read().await.keys()
    }

    pub async fn stats(&self) -> TierStats {
        TierStats {
            capacity: self.capacity,
            ttl: self.ttl,
            entries: self.entries.read().await.stats(),
            lists: self.lists.read().await.stats(),
            configs: self.configs.read().await.stats(),
        }
    }

    // == Cleanup Expired ==
    /// Drops expired local values across all regions.
    pub async fn cleanup_expired(&self) -> Vec<(Region, String)> {
        let mut removed = Vec::new();
        for region in Region::ALL {
            let keys = self.region(region).write().await.cleanup_expired();
            removed.extend(keys.into_iter().map(|key| (region, key)));
        }
        removed
    }

    // == Close ==
    /// Releases the shared store connection. Safe to call more than once.
    pub fn close(&self) -> bool {
        let closed = self.shared.write().take().is_some();
        if closed {
            info!("Shared store tier closed");
        }
        closed
    }
}
