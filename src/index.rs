//! Identity Index
//!
//! Reverse mapping from content identities to the cache keys whose values were
//! derived from them. Entry keys are indexed under `(model, entryID)` for the
//! primary entry and every linked entry; list keys are indexed under the model.
//! A reverse map from key to identities keeps removal exact, so an evicted key
//! disappears from every set that referenced it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::Region;

// == Entry Identity ==
/// A single content record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryIdentity {
    pub model: String,
    pub entry_id: String,
}

impl EntryIdentity {
    pub fn new(model: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            entry_id: entry_id.into(),
        }
    }
}

impl fmt::Display for EntryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.entry_id)
    }
}

// == Evicted ==
/// Keys removed from the index, grouped by the store region holding them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evicted {
    pub entry_keys: Vec<String>,
    pub list_keys: Vec<String>,
}

impl Evicted {
    pub fn len(&self) -> usize {
        self.entry_keys.len() + self.list_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_keys.is_empty() && self.list_keys.is_empty()
    }

    /// Combines two eviction results.
    pub fn and(mut self, other: Evicted) -> Evicted {
        self.entry_keys.extend(other.entry_keys);
        self.list_keys.extend(other.list_keys);
        self
    }
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<EntryIdentity, HashSet<String>>,
    models: HashMap<String, HashSet<String>>,
    entry_refs: HashMap<String, HashSet<EntryIdentity>>,
    list_refs: HashMap<String, String>,
}

impl IndexState {
    fn remove_entry_key(&mut self, key: &str) -> bool {
        let Some(identities) = self.entry_refs.remove(key) else {
            return false;
        };
        for identity in identities {
            if let Some(keys) = self.entries.get_mut(&identity) {
                keys.remove(key);
                if keys.is_empty() {
                    self.entries.remove(&identity);
                }
            }
        }
        true
    }

    fn remove_list_key(&mut self, key: &str) -> bool {
        let Some(model) = self.list_refs.remove(key) else {
            return false;
        };
        if let Some(keys) = self.models.get_mut(&model) {
            keys.remove(key);
            if keys.is_empty() {
                self.models.remove(&model);
            }
        }
        true
    }

    fn take_entry(&mut self, identity: &EntryIdentity) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .get(identity)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        for key in &keys {
            self.remove_entry_key(key);
        }
        keys
    }

    fn take_lists(&mut self, model: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .models
            .remove(model)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            self.list_refs.remove(key);
        }
        keys
    }

    fn identities_of_model(&self, model: &str) -> Vec<EntryIdentity> {
        self.entries
            .keys()
            .filter(|identity| identity.model == model)
            .cloned()
            .collect()
    }
}

// == Identity Index ==
/// Concurrent identity → key-set index. Every operation runs under one lock,
/// so an eviction sees a consistent snapshot of concurrent registrations.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    state: RwLock<IndexState>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes an entry key under its primary identity and every linked one.
    pub fn register_entry(&self, key: &str, primary: &EntryIdentity, linked: &[EntryIdentity]) {
        let mut state = self.state.write();
        for identity in std::iter::once(primary).chain(linked) {
            state
                .entries
                .entry(identity.clone())
                .or_default()
                .insert(key.to_string());
            state
                .entry_refs
                .entry(key.to_string())
                .or_default()
                .insert(identity.clone());
        }
    }

    /// Indexes a list key under its model.
    pub fn register_list(&self, key: &str, model: &str) {
        let mut state = self.state.write();
        state
            .models
            .entry(model.to_string())
            .or_default()
            .insert(key.to_string());
        state.list_refs.insert(key.to_string(), model.to_string());
    }

    /// Removes the list keys of `model`.
    pub fn evict_lists(&self, model: &str) -> Evicted {
        Evicted {
            entry_keys: Vec::new(),
            list_keys: self.state.write().take_lists(model),
        }
    }

    /// Evicts by identity.
    ///
    /// With an entry id: that entry's keys plus every list key of the model.
    /// Without: every list key and every entry key of the model.
    pub fn evict_by_identity(&self, model: &str, entry_id: Option<&str>) -> Evicted {
        let mut state = self.state.write();
        let mut evicted = Evicted {
            entry_keys: Vec::new(),
            list_keys: state.take_lists(model),
        };

        match entry_id {
            Some(entry_id) => {
                let identity = EntryIdentity::new(model, entry_id);
                evicted.entry_keys = state.take_entry(&identity);
            }
            None => {
                for identity in state.identities_of_model(model) {
                    evicted.entry_keys.extend(state.take_entry(&identity));
                }
            }
        }
        evicted
    }

    /// Every key that a full clear of `model` would evict. Does not modify the index.
    pub fn list_keys_for_model_prefix(&self, model: &str) -> Evicted {
        let state = self.state.read();
        let mut entry_keys: HashSet<String> = HashSet::new();
        for identity in state.identities_of_model(model) {
            if let Some(keys) = state.entries.get(&identity) {
                entry_keys.extend(keys.iter().cloned());
            }
        }
        Evicted {
            entry_keys: entry_keys.into_iter().collect(),
            list_keys: state
                .models
                .get(model)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Drops keys the store no longer holds (LRU eviction, expiry, failed refills).
    pub fn forget(&self, region: Region, keys: &[String]) -> usize {
        let mut state = self.state.write();
        keys.iter()
            .filter(|key| match region {
                Region::Entries => state.remove_entry_key(key.as_str()),
                Region::Lists => state.remove_list_key(key.as_str()),
                Region::Configs => false,
            })
            .count()
    }

    /// Empties the index, returning every key it held.
    pub fn drain(&self) -> Evicted {
        let mut state = self.state.write();
        let drained = Evicted {
            entry_keys: state.entry_refs.keys().cloned().collect(),
            list_keys: state.list_refs.keys().cloned().collect(),
        };
        *state = IndexState::default();
        drained
    }

    /// Keys currently indexed under one identity.
    pub fn keys_for_entry(&self, identity: &EntryIdentity) -> Vec<String> {
        self.state
            .read()
            .entries
            .get(identity)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct keys indexed.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.entry_refs.len() + state.list_refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(model: &str, entry: &str) -> EntryIdentity {
        EntryIdentity::new(model, entry)
    }

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[test]
    fn test_linked_identity_evicts_parent_key() {
        let index = IdentityIndex::new();
        let key = r#"blog|p1|["title"]|2"#;
        index.register_entry(key, &id("blog", "p1"), &[id("author", "a1")]);

        let evicted = index.evict_by_identity("author", Some("a1"));

        assert_eq!(evicted.entry_keys, vec![key.to_string()]);
        assert!(index.keys_for_entry(&id("blog", "p1")).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_entry_eviction_purges_model_lists() {
        let index = IdentityIndex::new();
        index.register_entry("blog|p1", &id("blog", "p1"), &[]);
        index.register_entry("blog|p2", &id("blog", "p2"), &[]);
        index.register_list("blog|", "blog");
        index.register_list("news|", "news");

        let evicted = index.evict_by_identity("blog", Some("p1"));

        assert_eq!(evicted.entry_keys, vec!["blog|p1".to_string()]);
        assert_eq!(evicted.list_keys, vec!["blog|".to_string()]);
        assert_eq!(index.keys_for_entry(&id("blog", "p2")), vec!["blog|p2".to_string()]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_model_eviction_removes_all_entries_of_model() {
        let index = IdentityIndex::new();
        index.register_entry("blog|p1", &id("blog", "p1"), &[]);
        index.register_entry("blog|p2|2", &id("blog", "p2"), &[id("author", "a1")]);
        index.register_entry("author|a1", &id("author", "a1"), &[]);
        index.register_list(r#"blog|{"size":1}"#, "blog");

        let preview = index.list_keys_for_model_prefix("blog");
        let evicted = index.evict_by_identity("blog", None);

        assert_eq!(sorted(preview.entry_keys), sorted(evicted.entry_keys.clone()));
        assert_eq!(
            sorted(evicted.entry_keys),
            vec!["blog|p1".to_string(), "blog|p2|2".to_string()]
        );
        assert_eq!(evicted.list_keys, vec![r#"blog|{"size":1}"#.to_string()]);
        assert_eq!(
            index.keys_for_entry(&id("author", "a1")),
            vec!["author|a1".to_string()]
        );
    }

    #[test]
    fn test_eviction_is_idempotent() {
        let index = IdentityIndex::new();
        index.register_entry("blog|p1", &id("blog", "p1"), &[]);

        assert_eq!(index.evict_by_identity("blog", Some("p1")).len(), 1);
        assert!(index.evict_by_identity("blog", Some("p1")).is_empty());
        assert!(index.evict_by_identity("blog", None).is_empty());
    }

    #[test]
    fn test_evict_lists_keeps_entries() {
        let index = IdentityIndex::new();
        index.register_entry("blog|p1", &id("blog", "p1"), &[]);
        index.register_list("blog|", "blog");

        let evicted = index.evict_lists("blog");

        assert_eq!(evicted.list_keys, vec!["blog|".to_string()]);
        assert!(evicted.entry_keys.is_empty());
        assert_eq!(index.keys_for_entry(&id("blog", "p1")).len(), 1);
    }

    #[test]
    fn test_forget_removes_from_all_sets() {
        let index = IdentityIndex::new();
        index.register_entry("k", &id("blog", "p1"), &[id("author", "a1")]);
        index.register_list("blog|", "blog");

        assert_eq!(index.forget(Region::Entries, &["k".to_string()]), 1);
        assert_eq!(index.forget(Region::Lists, &["blog|".to_string()]), 1);
        assert_eq!(index.forget(Region::Lists, &["blog|".to_string()]), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let index = IdentityIndex::new();
        index.register_entry("k", &id("blog", "p1"), &[id("blog", "p1")]);
        index.register_entry("k", &id("blog", "p1"), &[]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.keys_for_entry(&id("blog", "p1")), vec!["k".to_string()]);
    }

    #[test]
    fn test_drain_returns_everything() {
        let index = IdentityIndex::new();
        index.register_entry("k1", &id("a", "1"), &[]);
        index.register_list("a|", "a");

        let drained = index.drain();

        assert_eq!(drained.len(), 2);
        assert!(index.is_empty());
    }
}
