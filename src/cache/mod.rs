//! Cache Module
//!
//! The store tier: bounded local regions with TTL expiration, optionally
//! backed by a shared Redis tier.

mod entry;
mod region;
mod shared;
mod stats;
mod tier;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use region::{Region, RegionStore};
pub use shared::{MemorySharedStore, RedisStore, SharedTier};
pub use stats::{CacheStats, StatsReport};
pub use tier::{Lookup, StoreTier, TierStats};

// == Public Constants ==
/// Default per-region maximum number of values
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Default TTL in seconds
pub const DEFAULT_TTL: u64 = 300;
