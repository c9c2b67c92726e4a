//! Message Bus Module
//!
//! The change-notification transport. The cache consumes an AMQP-style
//! channel through [`MessageChannel`]: one exclusive queue per process, bound
//! to the `publicAPI` topic exchange with routing keys of the form
//! `{shortID}.{model}.{entryID}.#` (entry) or `{shortID}.{model}.#` (model).

mod listener;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use listener::{parse_change_event, InvalidationListener};
pub use memory::MemoryChannel;

/// Topic exchange carrying change events.
pub const EXCHANGE: &str = "publicAPI";

// == Transport Error ==
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

// == Delivery ==
/// One message as handed to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    /// The message `type` property, e.g. `entryUpdated`
    pub message_type: Option<String>,
    pub payload: Vec<u8>,
}

// == Message Channel ==
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Declares an exclusive queue and returns its name.
    async fn assert_queue(&self, name: &str) -> Result<String, TransportError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Starts consuming a queue.
    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, TransportError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;

    /// Releases the channel. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

// == Change Event ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// Interprets a message type. Anything not recognised as a creation or
    /// deletion is handled as an update.
    pub fn from_message_type(message_type: &str) -> Self {
        match message_type {
            "entryCreated" | "created" => ChangeKind::Created,
            "entryDeleted" | "deleted" => ChangeKind::Deleted,
            _ => ChangeKind::Updated,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ChangeKind::Created => "entryCreated",
            ChangeKind::Updated => "entryUpdated",
            ChangeKind::Deleted => "entryDeleted",
        }
    }
}

/// A change to one entry, consumed once by the invalidation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub model: String,
    pub entry_id: String,
}

// == Routing Keys ==
pub fn entry_routing_key(short_id: &str, model: &str, entry_id: &str) -> String {
    format!("{short_id}.{model}.{entry_id}.#")
}

pub fn model_routing_key(short_id: &str, model: &str) -> String {
    format!("{short_id}.{model}.#")
}

/// Routing key an event for `(model, entry_id)` is published with.
pub fn event_routing_key(short_id: &str, model: &str, entry_id: &str, kind: ChangeKind) -> String {
    format!("{short_id}.{model}.{entry_id}.{}", kind.message_type())
}

/// AMQP topic matching: `*` matches one word, `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((word, rest)) => match key.split_first() {
            Some((head, tail)) => (*word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}
