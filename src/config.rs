//! Configuration Module
//!
//! Construction options for [`crate::DmCache`] and the environment-driven
//! server configuration of the binary.

use std::env;

use crate::cache::{DEFAULT_CACHE_SIZE, DEFAULT_TTL};

/// Connection settings for the shared store tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix for every key written to the shared tier
    pub key_prefix: Option<String>,
}

// == Cache Options ==
/// Options recognised at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Prefix segment for every cache key
    pub namespace: Option<String>,
    /// Tag object results with `dmCacheHitFrom`
    pub append_source: bool,
    /// Per-region maximum number of values
    pub cache_size: usize,
    /// TTL in seconds; None = default, Some(0) = keep forever
    pub time_to_live: Option<u64>,
    pub external_store: Option<ExternalStoreConfig>,
    /// Seconds between expiry sweeps
    pub cleanup_interval: u64,
}

impl CacheOptions {
    /// TTL applied to stored values, None when they are kept forever.
    pub fn effective_ttl(&self) -> Option<u64> {
        match self.time_to_live {
            None => Some(DEFAULT_TTL),
            Some(0) => None,
            Some(ttl) => Some(ttl),
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            append_source: false,
            cache_size: DEFAULT_CACHE_SIZE,
            time_to_live: None,
            external_store: None,
            cleanup_interval: 30,
        }
    }
}

// == Server Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Per-region maximum number of values
    pub cache_size: usize,
    /// TTL in seconds, unset = default
    pub time_to_live: Option<u64>,
    pub namespace: Option<String>,
    pub append_source: bool,
    /// Base URL of the data manager API
    pub data_manager_url: String,
    pub data_manager_short_id: String,
    /// Enables the shared tier
    pub redis_url: Option<String>,
    /// Enables the in-process event bus and the event ingress endpoint
    pub live_events: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 30)
    /// - `DM_CACHE_SIZE` - Values per region (default: 1000)
    /// - `DM_CACHE_TTL` - TTL in seconds, 0 = forever (default: 300)
    /// - `DM_CACHE_NAMESPACE` - Key prefix (default: none)
    /// - `DM_CACHE_APPEND_SOURCE` - Tag results with their origin (default: false)
    /// - `DATA_MANAGER_URL` - Data manager API base (default: http://localhost:8080/api)
    /// - `DATA_MANAGER_SHORT_ID` - Data manager short id (default: 00000000)
    /// - `REDIS_URL` - Shared tier connection (default: none)
    /// - `DM_CACHE_LIVE_EVENTS` - In-process event bus (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parsed("SERVER_PORT").unwrap_or(defaults.server_port),
            cleanup_interval: parsed("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            cache_size: parsed("DM_CACHE_SIZE").unwrap_or(defaults.cache_size),
            time_to_live: parsed("DM_CACHE_TTL"),
            namespace: non_empty("DM_CACHE_NAMESPACE"),
            append_source: parsed("DM_CACHE_APPEND_SOURCE").unwrap_or(defaults.append_source),
            data_manager_url: non_empty("DATA_MANAGER_URL").unwrap_or(defaults.data_manager_url),
            data_manager_short_id: non_empty("DATA_MANAGER_SHORT_ID")
                .unwrap_or(defaults.data_manager_short_id),
            redis_url: non_empty("REDIS_URL"),
            live_events: parsed("DM_CACHE_LIVE_EVENTS").unwrap_or(defaults.live_events),
        }
    }

    /// Cache construction options derived from this configuration.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            namespace: self.namespace.clone(),
            append_source: self.append_source,
            cache_size: self.cache_size,
            time_to_live: self.time_to_live,
            external_store: self.redis_url.as_ref().map(|url| ExternalStoreConfig {
                url: url.clone(),
                key_prefix: None,
            }),
            cleanup_interval: self.cleanup_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cleanup_interval: 30,
            cache_size: DEFAULT_CACHE_SIZE,
            time_to_live: None,
            namespace: None,
            append_source: false,
            data_manager_url: "http://localhost:8080/api".to_string(),
            data_manager_short_id: "00000000".to_string(),
            redis_url: None,
            live_events: true,
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
