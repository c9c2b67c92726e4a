//! Background Tasks Module
//!
//! # Tasks
//! - TTL Cleanup: removes expired values and their index entries
//! - Invalidation: applies change events to the index and store

mod cleanup;
mod invalidation;

pub use cleanup::{cleanup_once, spawn_cleanup_task};
pub use invalidation::{apply_change, purge, spawn_invalidation_task};
