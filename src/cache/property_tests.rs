//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the store invariants under arbitrary operation
//! sequences.

use proptest::prelude::*;
use std::collections::HashSet;

use crate::cache::store::Lookup;
use crate::cache::{CacheEntry, EntryMeta, EntryStore, EvictionPolicy, Priority};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 20;

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}".prop_map(|s| s)
}

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
    ]
}

fn policy_strategy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lfu),
        Just(EvictionPolicy::Priority),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set {
        key: String,
        priority: Priority,
        persistent: bool,
    },
    Get {
        key: String,
    },
    Remove {
        key: String,
    },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), priority_strategy(), prop::bool::weighted(0.1))
            .prop_map(|(key, priority, persistent)| CacheOp::Set { key, priority, persistent }),
        2 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

fn entry(now: u64, priority: Priority, persistent: bool) -> CacheEntry {
    CacheEntry::new(
        true.into(),
        EntryMeta::new("actor", "resource"),
        now,
        None,
        priority,
        persistent,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // After every insert the store stays within capacity, and an exempt entry
    // is only ever lost through an explicit remove.
    #[test]
    fn prop_eviction_invariant(
        ops in prop::collection::vec(cache_op_strategy(), 1..200),
        policy in policy_strategy(),
    ) {
        let mut store = EntryStore::new(TEST_MAX_ENTRIES, policy);
        let mut exempt: HashSet<String> = HashSet::new();

        for (now, op) in ops.into_iter().enumerate() {
            let now = now as u64;
            match op {
                CacheOp::Set { key, priority, persistent } => {
                    let is_exempt = priority == Priority::High || persistent;
                    if store.insert(key.clone(), entry(now, priority, persistent)).is_ok() {
                        if is_exempt {
                            exempt.insert(key);
                        } else {
                            exempt.remove(&key);
                        }
                    }
                    prop_assert!(
                        store.len() <= TEST_MAX_ENTRIES,
                        "size {} exceeds max {}",
                        store.len(),
                        TEST_MAX_ENTRIES
                    );
                }
                CacheOp::Get { key } => {
                    let _ = store.get(&key, now);
                }
                CacheOp::Remove { key } => {
                    store.remove(&key);
                    exempt.remove(&key);
                }
            }

            for key in &exempt {
                prop_assert!(store.peek(key).is_some(), "exempt entry {} was evicted", key);
            }
        }
    }

    // Hits counted by the store match the reads that returned a value.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let mut store = EntryStore::new(100, EvictionPolicy::Lru);
        let mut expected_hits: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, .. } => {
                    let _ = store.insert(key, entry(0, Priority::Normal, false));
                }
                CacheOp::Get { key } => {
                    if let Lookup::Hit(_) = store.get(&key, 0) {
                        expected_hits += 1;
                    }
                }
                CacheOp::Remove { key } => {
                    store.remove(&key);
                }
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.total_entries, store.len());
    }

    // Entries never outlive their TTL, whatever the access pattern.
    #[test]
    fn prop_ttl_correctness(ttl in 1u64..10_000, probe in 0u64..20_000) {
        let mut store = EntryStore::new(10, EvictionPolicy::Lru);
        let mut e = entry(1_000, Priority::Normal, false);
        e.expires_at = Some(1_000 + ttl);
        store.insert("k".to_string(), e).unwrap();

        let result = store.get("k", 1_000 + probe);
        if probe > ttl {
            prop_assert_eq!(result, Lookup::Expired);
            prop_assert!(store.peek("k").is_none());
        } else {
            prop_assert!(matches!(result, Lookup::Hit(_)));
        }
    }
}
