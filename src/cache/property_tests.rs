//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the budget, accounting and uniqueness invariants
//! of `BoundedCache` over arbitrary operation sequences.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::thread::sleep;
use std::time::Duration;

use crate::cache::{BoundedCache, EvictionReason};

// == Test Configuration ==
const TEST_MAX_SIZE: usize = 256;
const TEST_MAX_ITEMS: usize = 16;

// == Strategies ==
/// Small key space so sequences revisit keys often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-h]{1,2}".prop_map(|s| s)
}

fn size_strategy() -> impl Strategy<Value = usize> {
    0usize..=64
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: u32, size: usize },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), any::<u32>(), size_strategy())
            .prop_map(|(key, value, size)| CacheOp::Set { key, value, size }),
        2 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Size equals the sum of live entries and both budgets always hold.
    #[test]
    fn prop_budgets_and_size_accounting(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);
        // Shadow model of live entries: key -> size
        let mut model: HashMap<String, usize> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { key, value, size } => {
                    let evictions = store.set(key.clone(), value, size).unwrap();
                    model.insert(key, size);
                    for eviction in evictions {
                        prop_assert_eq!(eviction.reason, EvictionReason::Capacity);
                        model.remove(&eviction.key);
                    }
                }
                CacheOp::Get { key } => {
                    prop_assert_eq!(store.get(&key).is_some(), model.contains_key(&key));
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(store.delete(&key), model.remove(&key).is_some());
                }
            }

            let stats = store.stats();
            prop_assert_eq!(stats.size, model.values().sum::<usize>());
            prop_assert_eq!(stats.item_count, model.len());
            prop_assert!(stats.size <= TEST_MAX_SIZE, "size {} over budget", stats.size);
            prop_assert!(stats.item_count <= TEST_MAX_ITEMS, "count {} over budget", stats.item_count);
        }
    }

    // Hits and misses reflect exactly the outcome of each get.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value, size } => {
                    let _ = store.set(key, value, size);
                }
                CacheOp::Get { key } => {
                    match store.get(&key) {
                        Some(_) => expected_hits += 1,
                        None => expected_misses += 1,
                    }
                }
                CacheOp::Delete { key } => {
                    store.delete(&key);
                }
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.item_count, store.len(), "Item count mismatch");
    }

    // Repeated sets of one key leave one entry holding the latest value and size.
    #[test]
    fn prop_overwrite_semantics(
        key in key_strategy(),
        writes in prop::collection::vec((any::<u32>(), size_strategy()), 1..10)
    ) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);

        for (value, size) in &writes {
            store.set(key.clone(), *value, *size).unwrap();
        }

        let (last_value, last_size) = writes[writes.len() - 1];
        prop_assert_eq!(store.len(), 1);
        prop_assert_eq!(store.size(), last_size);
        prop_assert_eq!(store.get(&key), Some(&last_value));
    }

    // Keys in the recency list are unique and match the index.
    #[test]
    fn prop_keys_unique(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);

        for op in ops {
            match op {
                CacheOp::Set { key, value, size } => { let _ = store.set(key, value, size); }
                CacheOp::Get { key } => { store.get(&key); }
                CacheOp::Delete { key } => { store.delete(&key); }
            }
        }

        let keys = store.keys();
        let unique: HashSet<&String> = keys.iter().collect();
        prop_assert_eq!(unique.len(), keys.len());
        for key in &keys {
            prop_assert!(store.has(key));
        }
    }

    // The most recently set key survives any single capacity eviction round.
    #[test]
    fn prop_latest_write_survives(
        entries in prop::collection::vec((key_strategy(), 1usize..=TEST_MAX_SIZE), 1..60)
    ) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);

        for (key, size) in entries {
            store.set(key.clone(), 0, size).unwrap();
            let keys = store.keys();
            prop_assert_eq!(keys.first(), Some(&key));
        }
    }
}

// Separate proptest block with fewer cases for time-sensitive TTL tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // Once the TTL has elapsed an entry is gone from get and from stats.
    #[test]
    fn prop_ttl_expiration_behavior(key in key_strategy(), value in any::<u32>(), size in size_strategy()) {
        let mut store: BoundedCache<u32> = BoundedCache::new(TEST_MAX_SIZE, TEST_MAX_ITEMS, None);

        store.set_with_ttl(key.clone(), value, size, Some(Duration::from_millis(50))).unwrap();
        prop_assert_eq!(store.get(&key), Some(&value));

        sleep(Duration::from_millis(51));

        prop_assert_eq!(store.stats().item_count, 0);
        prop_assert_eq!(store.get(&key), None);
    }
}
