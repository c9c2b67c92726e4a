//! DM Cache - A read-through cache for data manager entries
//!
//! Serves entry and list reads from bounded, TTL-limited local regions
//! (optionally backed by a shared Redis tier) and evicts exactly the cached
//! values affected when a change event arrives for an entry.

pub mod api;
pub mod backend;
pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod keys;
pub mod models;
pub mod subscription;
pub mod tasks;

pub use api::{create_router, AppState};
pub use backend::{ContentBackend, MemoryBackend, PublicApiBackend};
pub use bus::{MemoryChannel, MessageChannel};
pub use client::{DmCache, EntryRequest, Transform};
pub use config::{CacheOptions, Config, ExternalStoreConfig};
pub use error::{CacheError, Result};
