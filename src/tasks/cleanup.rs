//! TTL Cleanup Task
//!
//! Background task that periodically removes expired values from the local
//! regions and forgets their keys in the identity index.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Region, StoreTier};
use crate::index::IdentityIndex;

/// Runs one sweep and returns the number of values removed.
pub async fn cleanup_once(store: &StoreTier, index: &IdentityIndex) -> usize {
    let expired = store.cleanup_expired().await;
    for region in Region::ALL {
        let keys: Vec<String> = expired
            .iter()
            .filter(|(r, _)| *r == region)
            .map(|(_, key)| key.clone())
            .collect();
        store.forget_absent(region, &keys, index).await;
    }
    expired.len()
}

/// Spawns a background task sweeping expired values every `cleanup_interval_secs`.
///
/// Returns a JoinHandle that can be aborted on shutdown.
pub fn spawn_cleanup_task(
    store: Arc<StoreTier>,
    index: Arc<IdentityIndex>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cleanup_once(&store, &index).await;
            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Lookup;
    use crate::index::EntryIdentity;
    use serde_json::json;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let store = Arc::new(StoreTier::local(100, Some(1)).unwrap());
        let index = Arc::new(IdentityIndex::new());

        store.put(Region::Entries, "blog|p1", json!({"id": "p1"})).await;
        index.register_entry("blog|p1", &EntryIdentity::new("blog", "p1"), &[]);

        let handle = spawn_cleanup_task(store.clone(), index.clone(), 1);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(index.is_empty(), "Expired key should be forgotten");
        assert_eq!(store.get(Region::Entries, "blog|p1").await, Lookup::Miss);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_preserves_valid_entries() {
        let store = StoreTier::local(100, Some(3600)).unwrap();
        let index = IdentityIndex::new();

        store.put(Region::Lists, "blog|", json!([])).await;
        index.register_list("blog|", "blog");

        assert_eq!(cleanup_once(&store, &index).await, 0);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_index_of_refreshed_key() {
        let store = StoreTier::local(100, Some(1)).unwrap();
        let index = IdentityIndex::new();
        let identity = EntryIdentity::new("blog", "p1");

        store.put(Region::Entries, "blog|p1", json!({"id": "p1"})).await;
        index.register_entry("blog|p1", &identity, &[]);
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let expired = store.cleanup_expired().await;
        assert_eq!(expired.len(), 1);
        store.put(Region::Entries, "blog|p1", json!({"id": "p1", "v": 2})).await;

        let keys: Vec<String> = expired.into_iter().map(|(_, key)| key).collect();
        assert_eq!(store.forget_absent(Region::Entries, &keys, &index).await, 0);
        assert_eq!(index.keys_for_entry(&identity), vec!["blog|p1".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let store = Arc::new(StoreTier::local(10, None).unwrap());
        let handle = spawn_cleanup_task(store, Arc::new(IdentityIndex::new()), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
