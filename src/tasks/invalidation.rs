//! Invalidation Task
//!
//! Applies change events from the internal broadcast channel to the identity
//! index and the store tier.
//!
//! - created: the model's list values are stale; no existing entry value can
//!   depend on a brand-new entry.
//! - updated / deleted: the entry's values and the model's list values are stale.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{ChangeEvent, ChangeKind};
use crate::cache::{Region, StoreTier};
use crate::index::{Evicted, IdentityIndex};

/// Evicts whatever `event` makes stale and returns how many values were dropped.
pub async fn apply_change(index: &IdentityIndex, store: &StoreTier, event: &ChangeEvent) -> usize {
    let evicted = match event.kind {
        ChangeKind::Created => index.evict_lists(&event.model),
        ChangeKind::Updated | ChangeKind::Deleted => {
            index.evict_by_identity(&event.model, Some(&event.entry_id))
        }
    };

    let removed = purge(store, &evicted).await;
    debug!(
        model = %event.model,
        entry_id = %event.entry_id,
        kind = ?event.kind,
        removed,
        "applied change event"
    );
    removed
}

/// Deletes evicted keys from their regions.
pub async fn purge(store: &StoreTier, evicted: &Evicted) -> usize {
    store.delete_many(Region::Entries, &evicted.entry_keys).await
        + store.delete_many(Region::Lists, &evicted.list_keys).await
}

/// Spawns the task applying change events until the sender side closes.
pub fn spawn_invalidation_task(
    index: Arc<IdentityIndex>,
    store: Arc<StoreTier>,
    mut events: broadcast::Receiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    apply_change(&index, &store, &event).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    // Missed events cannot be replayed; drop every indexed value.
                    let removed = purge(&store, &index.drain()).await;
                    warn!(missed, removed, "invalidation lagged, purged all indexed values");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Invalidation task stopped");
    })
}
