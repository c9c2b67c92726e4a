//! Subscription Manager
//!
//! Tracks which identities have a live change-notification binding. Entry
//! bindings for one model coexist until the model itself is subscribed; the
//! model binding then supersedes them and they are unbound. A model binding is
//! never downgraded.
//!
//! Without a message channel every `ensure_*` call is a no-op and
//! [`SubscriptionManager::is_live`] reports false: the cache then relies on
//! TTL expiry alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bus::{entry_routing_key, model_routing_key, MessageChannel, EXCHANGE};
use crate::error::CacheError;

// == Subscription State ==
/// Binding scope currently covering an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    EntrySubscribed,
    ModelSubscribed,
}

#[derive(Debug, Default)]
struct SubscriptionTable {
    models: HashSet<String>,
    entries: HashMap<String, HashSet<String>>,
    /// Binds in flight; claimed under the lock, which is released for the bind
    pending_models: HashSet<String>,
    pending_entries: HashSet<(String, String)>,
}

impl SubscriptionTable {
    fn covers(&self, model: &str, entry_id: &str) -> bool {
        self.models.contains(model)
            || self
                .entries
                .get(model)
                .is_some_and(|entries| entries.contains(entry_id))
    }
}

/// The channel and queue bindings are made on.
struct Binder {
    channel: Arc<dyn MessageChannel>,
    queue: String,
}

pub struct SubscriptionManager {
    binder: Option<Binder>,
    short_id: String,
    table: Mutex<SubscriptionTable>,
}

impl SubscriptionManager {
    /// A manager binding `queue` on `channel`.
    pub fn live(channel: Arc<dyn MessageChannel>, queue: String, short_id: impl Into<String>) -> Self {
        Self {
            binder: Some(Binder { channel, queue }),
            short_id: short_id.into(),
            table: Mutex::new(SubscriptionTable::default()),
        }
    }

    /// A manager without transport; every ensure is a no-op.
    pub fn disabled(short_id: impl Into<String>) -> Self {
        Self {
            binder: None,
            short_id: short_id.into(),
            table: Mutex::new(SubscriptionTable::default()),
        }
    }

    /// Whether change events can reach this cache.
    pub fn is_live(&self) -> bool {
        self.binder.is_some()
    }

    // == Ensure Entry ==
    /// Binds the entry unless it or its model is already covered or a bind
    /// covering it is in flight.
    ///
    /// Failures are logged; the state is only recorded once the binding exists,
    /// so the next miss retries. A binding that completes after its model was
    /// subscribed is removed again.
    pub async fn ensure_entry_subscribed(&self, model: &str, entry_id: &str) {
        let Some(binder) = &self.binder else {
            return;
        };

        let claim = (model.to_string(), entry_id.to_string());
        {
            let mut table = self.table.lock().await;
            if table.covers(model, entry_id)
                || table.pending_models.contains(model)
                || !table.pending_entries.insert(claim.clone())
            {
                return;
            }
        }

        let routing_key = entry_routing_key(&self.short_id, model, entry_id);
        let bound = binder
            .channel
            .bind_queue(&binder.queue, EXCHANGE, &routing_key)
            .await;

        let superseded = {
            let mut table = self.table.lock().await;
            table.pending_entries.remove(&claim);
            if let Err(err) = bound {
                let err = CacheError::TransportDegraded(format!(
                    "could not bind {routing_key}: {err}"
                ));
                warn!(error = %err, model, entry_id, "entry subscription failed");
                return;
            }

            if table.models.contains(model) {
                true
            } else {
                debug!(model, entry_id, "entry subscribed");
                table
                    .entries
                    .entry(model.to_string())
                    .or_default()
                    .insert(entry_id.to_string());
                false
            }
        };

        if superseded {
            self.unbind_entry(binder, model, entry_id).await;
        }
    }

    // == Ensure Model ==
    /// Binds the whole model and unbinds the entry bindings it supersedes.
    pub async fn ensure_model_subscribed(&self, model: &str) {
        let Some(binder) = &self.binder else {
            return;
        };

        {
            let mut table = self.table.lock().await;
            if table.models.contains(model) || !table.pending_models.insert(model.to_string()) {
                return;
            }
        }

        let routing_key = model_routing_key(&self.short_id, model);
        let bound = binder
            .channel
            .bind_queue(&binder.queue, EXCHANGE, &routing_key)
            .await;

        let superseded = {
            let mut table = self.table.lock().await;
            table.pending_models.remove(model);
            if let Err(err) = bound {
                let err = CacheError::TransportDegraded(format!(
                    "could not bind {routing_key}: {err}"
                ));
                warn!(error = %err, model, "model subscription failed");
                return;
            }

            debug!(model, "model subscribed");
            table.models.insert(model.to_string());
            table.entries.remove(model).unwrap_or_default()
        };

        let unbinds = superseded
            .iter()
            .map(|entry_id| self.unbind_entry(binder, model, entry_id));
        join_all(unbinds).await;
    }

    async fn unbind_entry(&self, binder: &Binder, model: &str, entry_id: &str) {
        let routing_key = entry_routing_key(&self.short_id, model, entry_id);
        if let Err(err) = binder
            .channel
            .unbind_queue(&binder.queue, EXCHANGE, &routing_key)
            .await
        {
            let err = CacheError::TransportDegraded(format!(
                "could not unbind {routing_key}: {err}"
            ));
            warn!(error = %err, model, entry_id, "superseded entry binding left in place");
        }
    }

    /// Current state of an identity. Without an entry id, reports the model itself.
    pub async fn state(&self, model: &str, entry_id: Option<&str>) -> SubscriptionState {
        let table = self.table.lock().await;
        if table.models.contains(model) {
            return SubscriptionState::ModelSubscribed;
        }
        let entry_bound = match (entry_id, table.entries.get(model)) {
            (Some(entry_id), Some(entries)) => entries.contains(entry_id),
            _ => false,
        };
        if entry_bound {
            SubscriptionState::EntrySubscribed
        } else {
            SubscriptionState::Unsubscribed
        }
    }
}
