//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the key, store and index properties the cache's
//! coherence depends on.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::cache::{Lookup, Region, RegionStore, StoreTier};
use crate::index::{EntryIdentity, IdentityIndex};
use crate::keys::{EntryRef, KeyBuilder};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;
const TEST_DEFAULT_TTL: u64 = 300;

// == Strategies ==
/// Model titles and entry ids as the data manager issues them
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_\\-]{1,24}"
}

fn fields_strategy() -> impl Strategy<Value = Option<Vec<String>>> {
    prop::option::of(prop::collection::vec("[a-z]{1,8}", 1..4))
}

/// Small JSON documents
fn value_strategy() -> impl Strategy<Value = Value> {
    ("[a-zA-Z0-9 ]{0,32}", any::<i64>(), any::<bool>())
        .prop_map(|(title, count, published)| {
            json!({"title": title, "count": count, "published": published})
        })
}

#[derive(Debug, Clone)]
enum RegionOp {
    Set { key: String, value: Value },
    Get { key: String },
    Delete { key: String },
}

fn region_op_strategy() -> impl Strategy<Value = RegionOp> {
    prop_oneof![
        (segment_strategy(), value_strategy()).prop_map(|(key, value)| RegionOp::Set { key, value }),
        segment_strategy().prop_map(|key| RegionOp::Get { key }),
        segment_strategy().prop_map(|key| RegionOp::Delete { key }),
    ]
}

fn region(capacity: usize) -> RegionStore {
    let capacity = NonZeroUsize::new(capacity).expect("test capacity is non-zero");
    RegionStore::new(capacity, Some(TEST_DEFAULT_TTL))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Identical entry requests always produce the same key.
    #[test]
    fn prop_entry_key_is_deterministic(
        model in segment_strategy(),
        entry_id in segment_strategy(),
        fields in fields_strategy(),
        levels in 1u32..5,
    ) {
        let keys = KeyBuilder::new(None).unwrap();
        let entry = EntryRef::Id(entry_id);

        let first = keys.entry_key(&model, &entry, fields.as_deref(), Some(levels)).unwrap();
        let second = keys.entry_key(&model, &entry, fields.as_deref(), Some(levels)).unwrap();

        prop_assert_eq!(first, second);
    }

    // Changing any single component of an entry request changes its key.
    #[test]
    fn prop_entry_key_components_are_distinct(
        model in segment_strategy(),
        other_model in segment_strategy(),
        entry_id in segment_strategy(),
        other_entry in segment_strategy(),
        levels in 2u32..5,
    ) {
        prop_assume!(model != other_model);
        prop_assume!(entry_id != other_entry);

        let keys = KeyBuilder::new(None).unwrap();
        let entry = EntryRef::Id(entry_id.clone());
        let fields = vec!["title".to_string()];

        let base = keys.entry_key(&model, &entry, None, None).unwrap();
        let variants = [
            keys.entry_key(&other_model, &entry, None, None).unwrap(),
            keys.entry_key(&model, &EntryRef::Id(other_entry), None, None).unwrap(),
            keys.entry_key(&model, &entry, Some(&fields), None).unwrap(),
            keys.entry_key(&model, &entry, None, Some(levels)).unwrap(),
        ];

        let distinct: HashSet<&String> = variants.iter().chain(std::iter::once(&base)).collect();
        prop_assert_eq!(distinct.len(), variants.len() + 1);
    }

    // A read returns an equal value, and mutating it leaves the stored value intact.
    #[test]
    fn prop_roundtrip_returns_copies(key in segment_strategy(), value in value_strategy()) {
        let mut store = region(TEST_MAX_ENTRIES);
        store.set(key.clone(), value.clone());

        let mut first = store.get(&key).unwrap();
        prop_assert_eq!(&first, &value);

        first["title"] = json!("changed by caller");
        prop_assert_eq!(store.get(&key).unwrap(), value);
    }

    // For any sequence of operations the region never exceeds its capacity,
    // and hits plus misses equal the number of reads.
    #[test]
    fn prop_capacity_and_statistics(ops in prop::collection::vec(region_op_strategy(), 1..120)) {
        let max_entries = 16;
        let mut store = region(max_entries);
        let mut reads = 0u64;

        for op in ops {
            match op {
                RegionOp::Set { key, value } => {
                    store.set(key, value);
                }
                RegionOp::Get { key } => {
                    reads += 1;
                    let _ = store.get(&key);
                }
                RegionOp::Delete { key } => {
                    store.delete(&key);
                }
            }
            prop_assert!(store.len() <= max_entries);
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits + stats.misses, reads);
        prop_assert_eq!(stats.total_entries, store.len());
    }

    // Filling a full region evicts the least recently used key and reports it.
    #[test]
    fn prop_lru_eviction_reports_oldest(
        keys in prop::collection::hash_set(segment_strategy(), 2..10),
        new_key in segment_strategy(),
    ) {
        prop_assume!(!keys.contains(&new_key));
        let keys: Vec<String> = keys.into_iter().collect();
        let mut store = region(keys.len());

        for key in &keys {
            prop_assert!(store.set(key.clone(), json!(key)).is_none());
        }
        let evicted = store.set(new_key.clone(), json!("new"));

        prop_assert_eq!(evicted.as_ref(), Some(&keys[0]));
        prop_assert!(store.get(&keys[0]).is_none());
        prop_assert!(store.get(&new_key).is_some());
    }

    // Evicting an identity twice equals evicting it once.
    #[test]
    fn prop_eviction_is_idempotent(
        model in segment_strategy(),
        entry_ids in prop::collection::vec(segment_strategy(), 1..10),
    ) {
        let index = IdentityIndex::new();
        for entry_id in &entry_ids {
            let key = format!("{model}|{entry_id}");
            index.register_entry(&key, &EntryIdentity::new(model.as_str(), entry_id.as_str()), &[]);
        }
        index.register_list(&format!("{model}|"), &model);

        let first = index.evict_by_identity(&model, Some(&entry_ids[0]));
        let second = index.evict_by_identity(&model, Some(&entry_ids[0]));

        prop_assert!(!first.is_empty());
        prop_assert!(second.is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    // Every key registered for an identity and then evicted is gone from the
    // tier, while keys of other identities survive.
    #[test]
    fn prop_tier_eviction_is_exact(
        model in segment_strategy(),
        entry_ids in prop::collection::hash_set(segment_strategy(), 2..8),
    ) {
        let entry_ids: Vec<String> = entry_ids.into_iter().collect();
        let outcome = tokio_test::block_on(async {
            let tier = StoreTier::local(TEST_MAX_ENTRIES, Some(TEST_DEFAULT_TTL)).unwrap();
            let index = IdentityIndex::new();

            for entry_id in &entry_ids {
                let key = format!("{model}|{entry_id}");
                tier.put(Region::Entries, &key, json!({"id": entry_id})).await;
                index.register_entry(&key, &EntryIdentity::new(model.as_str(), entry_id.as_str()), &[]);
            }

            let evicted = index.evict_by_identity(&model, Some(&entry_ids[0]));
            crate::tasks::purge(&tier, &evicted).await;

            let mut survivors = 0;
            for entry_id in &entry_ids {
                let key = format!("{model}|{entry_id}");
                if !matches!(tier.get(Region::Entries, &key).await, Lookup::Miss) {
                    survivors += 1;
                }
            }
            let evicted_gone = tier.get(Region::Entries, &format!("{model}|{}", entry_ids[0])).await;
            (survivors, evicted_gone)
        });

        prop_assert_eq!(outcome.0, entry_ids.len() - 1);
        prop_assert_eq!(outcome.1, Lookup::Miss);
    }
}
