//! Shared Store Module
//!
//! The shared tier behind the local regions. [`StoreTier`](crate::cache::StoreTier)
//! depends only on the [`SharedTier`] trait; `RedisStore` is the production
//! tier and `MemorySharedStore` keeps values in-process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::info;

use crate::cache::Region;
use crate::config::ExternalStoreConfig;
use crate::error::{CacheError, Result};

const DEFAULT_KEY_PREFIX: &str = "dm-cache";

// == Shared Tier ==
#[async_trait]
pub trait SharedTier: Send + Sync {
    async fn get(&self, region: Region, key: &str) -> Result<Option<Value>>;

    async fn put(&self, region: Region, key: &str, value: &Value) -> Result<()>;

    async fn delete(&self, region: Region, key: &str) -> Result<()>;
}

fn full_key(prefix: &str, region: Region, key: &str) -> String {
    format!("{}:{}:{}", prefix, region.as_str(), key)
}

// == Redis Store ==
/// Redis-backed shared tier. Expiry is delegated to Redis.
#[derive(Clone)]
pub struct RedisStore {
    client: ConnectionManager,
    prefix: String,
    ttl: u64,
}

impl RedisStore {
    /// Connects to the configured Redis instance.
    pub async fn connect(config: &ExternalStoreConfig, ttl: u64) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::Configuration(format!("invalid external store url {}: {e}", config.url))
        })?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Configuration(format!("could not connect to external store: {e}"))
        })?;

        info!("Shared store tier connected (TTL: {} seconds)", ttl);
        Ok(Self {
            client: manager,
            prefix: config
                .key_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            ttl,
        })
    }
}

#[async_trait]
impl SharedTier for RedisStore {
    async fn get(&self, region: Region, key: &str) -> Result<Option<Value>> {
        let mut conn = self.client.clone();
        let raw: Option<String> = conn
            .get(full_key(&self.prefix, region, key))
            .await
            .map_err(degraded)?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::TransportDegraded(format!("corrupt shared value: {e}"))),
            None => Ok(None),
        }
    }

    async fn put(&self, region: Region, key: &str, value: &Value) -> Result<()> {
        let mut conn = self.client.clone();
        let json = value.to_string();
        conn.set_ex::<_, _, ()>(full_key(&self.prefix, region, key), json, self.ttl)
            .await
            .map_err(degraded)
    }

    async fn delete(&self, region: Region, key: &str) -> Result<()> {
        let mut conn = self.client.clone();
        conn.del::<_, ()>(full_key(&self.prefix, region, key))
            .await
            .map_err(degraded)
    }
}

fn degraded(err: redis::RedisError) -> CacheError {
    CacheError::TransportDegraded(format!("shared store: {err}"))
}

// == Memory Shared Store ==
/// In-process shared tier. Several caches can hold the same instance to
/// share values the way they would share a Redis server. Values never expire.
#[derive(Debug, Default)]
pub struct MemorySharedStore {
    values: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail, as an unreachable server would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stores a value directly, bypassing any local tier.
    pub fn seed(&self, region: Region, key: &str, value: Value) {
        self.values
            .lock()
            .insert(full_key(DEFAULT_KEY_PREFIX, region, key), value);
    }

    pub fn contains(&self, region: Region, key: &str) -> bool {
        self.values
            .lock()
            .contains_key(&full_key(DEFAULT_KEY_PREFIX, region, key))
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::TransportDegraded(
                "shared store: unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedTier for MemorySharedStore {
    async fn get(&self, region: Region, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self
            .values
            .lock()
            .get(&full_key(DEFAULT_KEY_PREFIX, region, key))
            .cloned())
    }

    async fn put(&self, region: Region, key: &str, value: &Value) -> Result<()> {
        self.check()?;
        self.seed(region, key, value.clone());
        Ok(())
    }

    async fn delete(&self, region: Region, key: &str) -> Result<()> {
        self.check()?;
        self.values
            .lock()
            .remove(&full_key(DEFAULT_KEY_PREFIX, region, key));
        Ok(())
    }
}
