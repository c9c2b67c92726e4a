//! Backend Module
//!
//! The content backend the cache reads through to. The cache depends only on
//! the [`ContentBackend`] trait; `PublicApiBackend` talks HTTP to a data
//! manager and `MemoryBackend` serves fixtures in-process.

mod hal;
mod http;
mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::index::EntryIdentity;
use crate::keys::ListOptions;

pub use hal::find_linked_entries;
pub use http::PublicApiBackend;
pub use memory::MemoryBackend;

// == Backend Error ==
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} responded with status {status}")]
    Status { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("{0}")]
    Other(String),
}

// == Entry Options ==
/// Projection and depth of a single-entry fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOptions {
    /// Field names to return, in request order
    pub fields: Option<Vec<String>>,
    /// Link depth, 1 = the entry alone
    pub levels: u32,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            fields: None,
            levels: 1,
        }
    }
}

// == Content Backend ==
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Short id of the data manager, used as the routing-key prefix.
    fn short_id(&self) -> &str;

    async fn get_entry(
        &self,
        model: &str,
        entry_id: &str,
        options: &EntryOptions,
    ) -> Result<Value, BackendError>;

    async fn get_entries(&self, model: &str, filter: &ListOptions) -> Result<Value, BackendError>;

    /// Identities of the entries linked from a multi-level fetch result.
    fn find_linked_entries(&self, entry: &Value, levels: u32) -> Vec<EntryIdentity> {
        find_linked_entries(entry, levels)
    }

    /// Data manager configuration. Optional capability.
    async fn get_config(&self) -> Result<Value, BackendError> {
        Err(BackendError::Unsupported("get_config"))
    }
}
