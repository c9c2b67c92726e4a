//! Cache Key Builder
//!
//! Derives deterministic cache keys from the shape of a read request.
//! Segments are joined with `|`, which is rejected inside plain segments;
//! field selections and filters are JSON-encoded before joining.

use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

/// Separator between key segments.
pub const SEPARATOR: char = '|';

/// Segment used for the backend configuration blob.
const CONFIG_SEGMENT: &str = "__config";

/// Filter options for list reads, serialized into the list key.
pub type ListOptions = Map<String, Value>;

// == Entry Reference ==
/// An entry given either by id or as an object exposing an `id` field.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryRef {
    Id(String),
    Object(Value),
}

impl EntryRef {
    /// Extracts and validates the entry id.
    pub fn resolve(&self, operation: &str) -> Result<String> {
        let id = match self {
            EntryRef::Id(id) => Some(id.as_str()),
            EntryRef::Object(value) => value.get("id").and_then(Value::as_str),
        };
        match id {
            Some(id) if !id.is_empty() && !id.contains(SEPARATOR) => Ok(id.to_string()),
            _ => Err(CacheError::InvalidArgument(format!(
                "entryID '{}' given to {} is invalid!",
                self.describe(),
                operation
            ))),
        }
    }

    fn describe(&self) -> String {
        match self {
            EntryRef::Id(id) => render(id),
            EntryRef::Object(value) => match value.get("id") {
                Some(Value::String(id)) => render(id),
                Some(other) => other.to_string(),
                None => value.to_string(),
            },
        }
    }
}

impl From<&str> for EntryRef {
    fn from(id: &str) -> Self {
        EntryRef::Id(id.to_string())
    }
}

impl From<String> for EntryRef {
    fn from(id: String) -> Self {
        EntryRef::Id(id)
    }
}

impl From<&String> for EntryRef {
    fn from(id: &String) -> Self {
        EntryRef::Id(id.clone())
    }
}

impl From<Value> for EntryRef {
    fn from(value: Value) -> Self {
        match value {
            Value::String(id) => EntryRef::Id(id),
            other => EntryRef::Object(other),
        }
    }
}

impl From<&Value> for EntryRef {
    fn from(value: &Value) -> Self {
        EntryRef::from(value.clone())
    }
}

fn render(value: &str) -> String {
    if value.is_empty() {
        "undefined".to_string()
    } else {
        value.to_string()
    }
}

/// Rejects a missing, empty, or separator-containing model title.
pub fn validate_model(model: &str, operation: &str) -> Result<()> {
    if model.is_empty() || model.contains(SEPARATOR) {
        return Err(CacheError::InvalidArgument(format!(
            "modelTitle '{}' given to {} is invalid!",
            render(model),
            operation
        )));
    }
    Ok(())
}

// == Key Builder ==
/// Builds namespaced cache keys. Pure: identical requests yield identical keys.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    namespace: Option<String>,
}

impl KeyBuilder {
    /// Creates a builder with an optional namespace prefix.
    pub fn new(namespace: Option<String>) -> Result<Self> {
        if let Some(ns) = &namespace {
            if ns.is_empty() || ns.contains(SEPARATOR) {
                return Err(CacheError::InvalidArgument(format!(
                    "namespace '{}' is invalid!",
                    render(ns)
                )));
            }
        }
        Ok(Self { namespace })
    }

    /// Key for a single-entry read.
    ///
    /// `fields` order is significant. `levels` only appears when greater than 1.
    pub fn entry_key(
        &self,
        model: &str,
        entry: &EntryRef,
        fields: Option<&[String]>,
        levels: Option<u32>,
    ) -> Result<String> {
        validate_model(model, "KeyBuilder::entry_key")?;
        let entry_id = entry.resolve("KeyBuilder::entry_key")?;

        let mut segments = self.prefix();
        segments.push(model.to_string());
        segments.push(entry_id);
        if let Some(fields) = fields.filter(|f| !f.is_empty()) {
            segments.push(encode(fields)?);
        }
        if let Some(levels) = levels.filter(|l| *l > 1) {
            segments.push(levels.to_string());
        }
        Ok(self.join(segments))
    }

    /// Key for a filtered list read. An absent or empty filter keys as `<model>|`.
    pub fn list_key(&self, model: &str, filter: Option<&ListOptions>) -> Result<String> {
        validate_model(model, "KeyBuilder::list_key")?;

        let mut segments = self.prefix();
        segments.push(model.to_string());
        match filter.filter(|f| !f.is_empty()) {
            Some(filter) => segments.push(encode(filter)?),
            None => segments.push(String::new()),
        }
        Ok(self.join(segments))
    }

    /// Key for the backend configuration blob.
    pub fn config_key(&self) -> String {
        let mut segments = self.prefix();
        segments.push(CONFIG_SEGMENT.to_string());
        self.join(segments)
    }

    fn prefix(&self) -> Vec<String> {
        self.namespace.iter().cloned().collect()
    }

    fn join(&self, segments: Vec<String>) -> String {
        segments.join(&SEPARATOR.to_string())
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CacheError::InvalidArgument(format!("could not serialize key segment: {e}")))
}
