//! Property-based coverage of the versioning contract: no delivery order,
//! duplication, or interleaving of authoritative updates may ever regress
//! the cache, and the final state is always the highest-version entry.

use proptest::prelude::*;
use tokio_test::block_on;
use uuid::Uuid;

use stockflow_core::cache::{InMemoryStockCache, StockCache};
use stockflow_core::messaging::deterministic_intent_id;

/// Updates with distinct versions 1..=n carrying a recognizable quantity,
/// delivered in arbitrary order.
fn shuffled_updates() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec(0i64..1000, 1..40)
        .prop_map(|quantities| {
            quantities
                .into_iter()
                .enumerate()
                .map(|(index, quantity)| (quantity, index as i64 + 1))
                .collect::<Vec<(i64, i64)>>()
        })
        .prop_shuffle()
}

proptest! {
    /// Property: for any delivery order, the cache ends at the entry with
    /// the highest version.
    #[test]
    fn cache_converges_to_highest_version(updates in shuffled_updates()) {
        let cache = InMemoryStockCache::new();
        let product_id = Uuid::new_v4();

        block_on(async {
            for (quantity, version) in &updates {
                cache.set_if_newer(product_id, *quantity, *version).await;
            }
        });

        let expected = updates.iter().max_by_key(|(_, version)| *version).unwrap();
        let held = block_on(cache.get(product_id)).unwrap();
        prop_assert_eq!(held.version, expected.1);
        prop_assert_eq!(held.quantity, expected.0);
    }

    /// Property: the held version never decreases while updates stream in.
    #[test]
    fn cache_version_is_monotonic(updates in shuffled_updates()) {
        let cache = InMemoryStockCache::new();
        let product_id = Uuid::new_v4();

        let mut last_seen = 0i64;
        for (quantity, version) in updates {
            block_on(cache.set_if_newer(product_id, quantity, version));
            let held = block_on(cache.get(product_id)).unwrap().version;
            prop_assert!(held >= last_seen, "version regressed: {held} < {last_seen}");
            last_seen = held;
        }
    }

    /// Property: redelivering an entire update stream changes nothing.
    #[test]
    fn duplicated_stream_is_idempotent(updates in shuffled_updates()) {
        let cache = InMemoryStockCache::new();
        let product_id = Uuid::new_v4();

        block_on(async {
            for (quantity, version) in &updates {
                cache.set_if_newer(product_id, *quantity, *version).await;
            }
        });
        let after_first = block_on(cache.get(product_id));

        block_on(async {
            for (quantity, version) in &updates {
                cache.set_if_newer(product_id, *quantity, *version).await;
            }
        });
        prop_assert_eq!(block_on(cache.get(product_id)), after_first);
    }

    /// Property: intent ids are stable per (order, line index) and distinct
    /// across line indexes.
    #[test]
    fn intent_ids_are_deterministic_and_distinct(line_indexes in prop::collection::hash_set(0i32..10_000, 2..20)) {
        let order_id = Uuid::new_v4();
        let ids: Vec<Uuid> = line_indexes
            .iter()
            .map(|index| deterministic_intent_id(order_id, *index))
            .collect();

        // Stable on recomputation
        for (index, id) in line_indexes.iter().zip(ids.iter()) {
            prop_assert_eq!(deterministic_intent_id(order_id, *index), *id);
        }

        // Distinct per line index
        let unique: std::collections::HashSet<Uuid> = ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), ids.len());
    }
}
