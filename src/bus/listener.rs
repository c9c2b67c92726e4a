//! Invalidation Listener
//!
//! Consumes the cache's queue, turns each message into a [`ChangeEvent`] on the
//! internal broadcast channel, and acknowledges it. Unparseable messages are
//! negatively acknowledged without requeue; the loop keeps running.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{ChangeEvent, ChangeKind, Delivery, MessageChannel};
use crate::error::CacheError;

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "modelTitle")]
    model_title: String,
    #[serde(rename = "entryID")]
    entry_id: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Parses a delivery. The message `type` property wins over a `type` field in the body.
pub fn parse_change_event(delivery: &Delivery) -> Result<ChangeEvent, String> {
    let payload: EventPayload = serde_json::from_slice(&delivery.payload)
        .map_err(|e| format!("could not parse event: {e}"))?;

    if payload.model_title.is_empty() || payload.entry_id.is_empty() {
        return Err("event without modelTitle or entryID".to_string());
    }

    let kind = delivery
        .message_type
        .as_deref()
        .or(payload.kind.as_deref())
        .map(ChangeKind::from_message_type)
        .unwrap_or(ChangeKind::Updated);

    Ok(ChangeEvent {
        kind,
        model: payload.model_title,
        entry_id: payload.entry_id,
    })
}

/// Handle to the running consumer task.
pub struct InvalidationListener {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl InvalidationListener {
    /// Spawns the consumer loop.
    pub fn spawn(
        channel: Arc<dyn MessageChannel>,
        mut deliveries: mpsc::UnboundedReceiver<Delivery>,
        events: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("Invalidation listener started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    delivery = deliveries.recv() => match delivery {
                        Some(delivery) => handle_delivery(channel.as_ref(), &events, delivery).await,
                        None => break,
                    },
                }
            }
            info!("Invalidation listener stopped");
        });

        Self { handle, shutdown }
    }

    /// Stops consuming. Messages already handed to the loop are finished first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "invalidation listener ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn handle_delivery(
    channel: &dyn MessageChannel,
    events: &broadcast::Sender<ChangeEvent>,
    delivery: Delivery,
) {
    let tag = delivery.delivery_tag;
    match parse_change_event(&delivery) {
        Ok(event) => {
            debug!(
                model = %event.model,
                entry_id = %event.entry_id,
                kind = ?event.kind,
                "change event received"
            );
            if events.send(event).is_err() {
                debug!("no invalidation subscribers, event dropped");
            }
            if let Err(err) = channel.ack(tag).await {
                let err = CacheError::TransportDegraded(format!("could not ack message: {err}"));
                warn!(error = %err, tag, "ack failed");
            }
        }
        Err(reason) => {
            warn!(
                tag,
                routing_key = %delivery.routing_key,
                payload = %String::from_utf8_lossy(&delivery.payload),
                "{}",
                reason
            );
            if let Err(err) = channel.nack(tag, false).await {
                let err = CacheError::TransportDegraded(format!("could not nack message: {err}"));
                warn!(error = %err, tag, "nack failed");
            }
        }
    }
}
