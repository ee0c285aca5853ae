//! Property-Based Tests for the SWR Keyed Cache
//!
//! Property: for any set of keys inserted via `set`, `get` SHALL return the
//! inserted data, fresh while inside the TTL and stale after it, and never
//! `None` until the key is cleared or evicted by a capacity sweep.

use ideafit_storage::KeyedCache;
use ideafit_test_utils::generators::arb_param_map;
use ideafit_test_utils::SwrCacheConfig;
use proptest::collection::btree_map;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fresh_reads_return_inserted_data(
        entries in btree_map("[a-z]{1,12}", any::<i64>(), 1..50),
    ) {
        let cache: KeyedCache<i64> = KeyedCache::default();
        for (key, value) in &entries {
            cache.set(key, *value, 5);
        }

        for (key, value) in &entries {
            let read = cache.get_entry(key).expect("inserted key present");
            prop_assert_eq!(*read.value(), *value);
            prop_assert!(!read.is_stale());
            prop_assert!(!cache.is_stale(key));
        }
        prop_assert_eq!(cache.len(), entries.len());
    }

    #[test]
    fn prop_expired_reads_still_return_data(
        entries in btree_map("[a-z]{1,12}", any::<i64>(), 1..50),
    ) {
        let cache: KeyedCache<i64> = KeyedCache::default();
        for (key, value) in &entries {
            cache.set_with_ttl(key, *value, Duration::ZERO);
        }

        for (key, value) in &entries {
            prop_assert!(cache.is_stale(key));
            let read = cache.get_entry(key).expect("stale data is still served");
            prop_assert_eq!(*read.value(), *value);
            prop_assert!(read.is_stale());
        }

        let stats = cache.get_stats();
        prop_assert_eq!(stats.total_entries, entries.len());
        prop_assert_eq!(stats.valid_entries, 0);
        prop_assert_eq!(stats.stale_hits, entries.len() as u64);
    }

    #[test]
    fn prop_key_ignores_insertion_order(params in arb_param_map()) {
        let mut reversed = BTreeMap::new();
        for (k, v) in params.iter().rev() {
            reversed.insert(k.clone(), v.clone());
        }
        prop_assert_eq!(
            KeyedCache::<()>::generate_key(&params),
            KeyedCache::<()>::generate_key(&reversed)
        );
    }

    #[test]
    fn prop_capacity_sweep_keeps_young_entries(extra in 1usize..20) {
        let config = SwrCacheConfig::default().with_capacity(4);
        let cache: KeyedCache<usize> = KeyedCache::new(config);
        for i in 0..(4 + extra) {
            cache.set(&format!("k{i}"), i, 5);
        }

        // Nothing is older than max age, so the sweep evicts nothing
        for i in 0..(4 + extra) {
            prop_assert_eq!(cache.get(&format!("k{i}")), Some(i));
        }
        prop_assert_eq!(cache.get_stats().evictions, 0);
    }
}
