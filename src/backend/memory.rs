//! In-process backend serving fixture payloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::backend::{BackendError, ContentBackend, EntryOptions};
use crate::index::EntryIdentity;
use crate::keys::ListOptions;

/// Fixture backend. Counts fetches so callers can observe cache hits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    short_id: String,
    entries: RwLock<HashMap<EntryIdentity, Value>>,
    lists: RwLock<HashMap<String, Value>>,
    config: RwLock<Option<Value>>,
    last_options: RwLock<Option<EntryOptions>>,
    entry_calls: AtomicUsize,
    list_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new(short_id: impl Into<String>) -> Self {
        Self {
            short_id: short_id.into(),
            ..Self::default()
        }
    }

    pub fn insert_entry(&self, model: &str, entry_id: &str, payload: Value) {
        self.entries
            .write()
            .insert(EntryIdentity::new(model, entry_id), payload);
    }

    /// Sets the payload returned for every list read of `model`.
    pub fn insert_list(&self, model: &str, payload: Value) {
        self.lists.write().insert(model.to_string(), payload);
    }

    pub fn set_config(&self, payload: Value) {
        *self.config.write() = Some(payload);
    }

    /// Makes every subsequent fetch fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entry_calls(&self) -> usize {
        self.entry_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent `get_entry`.
    pub fn last_entry_options(&self) -> Option<EntryOptions> {
        self.last_options.read().clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Other("backend unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentBackend for MemoryBackend {
    fn short_id(&self) -> &str {
        &self.short_id
    }

    async fn get_entry(
        &self,
        model: &str,
        entry_id: &str,
        options: &EntryOptions,
    ) -> Result<Value, BackendError> {
        self.entry_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.write() = Some(options.clone());
        self.check_available()?;

        self.entries
            .read()
            .get(&EntryIdentity::new(model, entry_id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{model}/{entry_id}")))
    }

    async fn get_entries(&self, model: &str, _filter: &ListOptions) -> Result<Value, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.lists
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(model.to_string()))
    }

    async fn get_config(&self) -> Result<Value, BackendError> {
        self.check_available()?;
        self.config
            .read()
            .clone()
            .ok_or(BackendError::Unsupported("get_config"))
    }
}
