//! Cache-side convergence behavior that needs no database: the
//! monotonic-version rule under in-order, out-of-order, duplicated, and
//! concurrent delivery.

use std::sync::Arc;
use uuid::Uuid;

use stockflow_core::cache::{CachedStock, InMemoryStockCache, StockCache};

#[tokio::test]
async fn in_order_updates_converge_to_latest() {
    let cache = InMemoryStockCache::new();
    let product_id = Uuid::new_v4();

    assert!(cache.set_if_newer(product_id, 10, 1).await);
    assert!(cache.set_if_newer(product_id, 8, 2).await);
    assert!(cache.set_if_newer(product_id, 5, 3).await);

    assert_eq!(
        cache.get(product_id).await,
        Some(CachedStock {
            quantity: 5,
            version: 3
        })
    );
}

#[tokio::test]
async fn out_of_order_delivery_keeps_higher_version() {
    let cache = InMemoryStockCache::new();
    let product_id = Uuid::new_v4();

    // Version 6 delivered before version 5
    assert!(cache.set_if_newer(product_id, 4, 6).await);
    assert!(!cache.set_if_newer(product_id, 6, 5).await);

    assert_eq!(
        cache.get(product_id).await,
        Some(CachedStock {
            quantity: 4,
            version: 6
        })
    );

    // And the mirror image: either delivery order ends in the same state
    let other = Uuid::new_v4();
    assert!(cache.set_if_newer(other, 6, 5).await);
    assert!(cache.set_if_newer(other, 4, 6).await);
    assert_eq!(cache.get(other).await, cache.get(product_id).await);
}

#[tokio::test]
async fn duplicate_delivery_is_a_noop() {
    let cache = InMemoryStockCache::new();
    let product_id = Uuid::new_v4();

    assert!(cache.set_if_newer(product_id, 8, 2).await);
    assert!(!cache.set_if_newer(product_id, 8, 2).await);

    assert_eq!(
        cache.get(product_id).await,
        Some(CachedStock {
            quantity: 8,
            version: 2
        })
    );
}

#[tokio::test]
async fn lazy_fill_loses_to_concurrent_newer_write() {
    let cache = InMemoryStockCache::new();
    let product_id = Uuid::new_v4();

    // Synchronizer applied version 3 between a reader's miss and its fill
    assert!(cache.set_if_newer(product_id, 7, 3).await);

    // The read-through fill observed the ledger at version 2 and must lose
    assert!(!cache.set_if_newer(product_id, 9, 2).await);
    assert_eq!(cache.get(product_id).await.unwrap().version, 3);
}

#[tokio::test]
async fn interleaved_writers_never_regress() {
    let cache = Arc::new(InMemoryStockCache::new());
    let product_id = Uuid::new_v4();

    let mut handles = Vec::new();
    for version in (1..=100i64).rev() {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.set_if_newer(product_id, version, version).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        cache.get(product_id).await,
        Some(CachedStock {
            quantity: 100,
            version: 100
        })
    );
}

#[tokio::test]
async fn distinct_products_are_independent() {
    let cache = InMemoryStockCache::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    assert!(cache.set_if_newer(a, 10, 5).await);
    assert!(cache.set_if_newer(b, 3, 1).await);

    assert_eq!(cache.get(a).await.unwrap().version, 5);
    assert_eq!(cache.get(b).await.unwrap().version, 1);
    assert_eq!(cache.len().await, 2);
}
