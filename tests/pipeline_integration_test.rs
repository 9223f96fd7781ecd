//! End-to-end pipeline tests against PostgreSQL + pgmq.
//!
//! These tests require a database with the pgmq extension and are skipped
//! when `TEST_DATABASE_URL` is not set. Each test uses its own queue pair
//! and freshly generated product/order ids, so the suite can run in
//! parallel against one database.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use rust_decimal_macros::dec;
use stockflow_core::cache::{InMemoryStockCache, StockCache};
use stockflow_core::config::StockFlowConfig;
use stockflow_core::diagnostics::ConvergenceChecker;
use stockflow_core::error::StockFlowError;
use stockflow_core::messaging::{PgmqClient, StockDecrementIntent};
use stockflow_core::models::{DecrementOutcome, NewOrderLineItem, Order, ProductStock};
use stockflow_core::orchestration::{
    CacheSynchronizer, DecrementDispatcher, DispatchRecoverySweep, OrderLifecycle,
    StockReconciler,
};
use stockflow_core::state_machine::{OrderEvent, OrderStateMachine};

struct TestHarness {
    pool: PgPool,
    pgmq: Arc<PgmqClient>,
    config: StockFlowConfig,
    lifecycle: OrderLifecycle,
    reconciler: StockReconciler,
    synchronizer: CacheSynchronizer,
    cache: Arc<InMemoryStockCache>,
}

/// Build a harness with per-test queues, or None when no test database is
/// available.
async fn harness(test_name: &str) -> Option<TestHarness> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        println!("Skipping integration test - no TEST_DATABASE_URL provided");
        return None;
    };

    stockflow_core::logging::init_structured_logging();

    let connection = stockflow_core::database::DatabaseConnection::new(&database_url)
        .await
        .expect("Failed to connect to test database");
    assert!(connection.health_check().await.expect("health check failed"));
    let pool = connection.pool().clone();
    stockflow_core::database::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let config = StockFlowConfig {
        database_url,
        intent_queue: format!("sf_test_intent_{test_name}"),
        update_queue: format!("sf_test_update_{test_name}"),
        visibility_timeout_secs: 5,
        dispatch_max_attempts: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 100,
        ..Default::default()
    };

    let pgmq = Arc::new(PgmqClient::new_with_pool(pool.clone()).await);
    pgmq.initialize_pipeline_queues(&config.intent_queue, &config.update_queue)
        .await
        .expect("Failed to create queues");
    for queue in [&config.intent_queue, &config.update_queue] {
        pgmq.purge_queue(queue).await.expect("Failed to purge queue");
    }

    let dispatcher = DecrementDispatcher::new(Arc::clone(&pgmq), config.clone());
    let lifecycle = OrderLifecycle::new(pool.clone(), dispatcher);
    let cache = Arc::new(InMemoryStockCache::new());
    let reconciler = StockReconciler::new(pool.clone(), Arc::clone(&pgmq), config.clone());
    let synchronizer = CacheSynchronizer::new(
        pool.clone(),
        Arc::clone(&pgmq),
        Arc::clone(&cache) as Arc<dyn StockCache>,
        config.clone(),
    );

    Some(TestHarness {
        pool,
        pgmq,
        config,
        lifecycle,
        reconciler,
        synchronizer,
        cache,
    })
}

fn line(product_id: Uuid, quantity: i64) -> NewOrderLineItem {
    NewOrderLineItem {
        product_id,
        quantity,
        unit_price: dec!(4.99),
    }
}

fn payment() -> stockflow_core::orchestration::PaymentDetails {
    stockflow_core::orchestration::PaymentDetails {
        method: "card".to_string(),
        reference: Uuid::new_v4().to_string(),
    }
}

#[tokio::test]
async fn single_order_end_to_end_convergence() {
    let Some(h) = harness("single_order").await else { return };

    let product_id = Uuid::new_v4();
    let seeded = ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");
    assert_eq!((seeded.quantity, seeded.version), (10, 1));

    let buyer_id = Uuid::new_v4();
    let order = h
        .lifecycle
        .create(buyer_id, vec![line(product_id, 2)])
        .await
        .expect("Failed to create order");
    assert_eq!(order.status, "pending");
    assert_eq!(order.total_amount, dec!(9.98));

    let completed = h
        .lifecycle
        .complete_payment(order.order_id, payment())
        .await
        .expect("Failed to complete payment");
    assert_eq!(completed.status, "completed");
    assert!(completed.intents_dispatched_at.is_some());

    let batch = h.reconciler.process_available().await.expect("Reconcile failed");
    assert_eq!(batch.applied, 1);
    assert_eq!(batch.dead_lettered, 0);

    let ledger = ProductStock::get(&h.pool, product_id)
        .await
        .expect("Ledger read failed")
        .expect("Ledger row missing");
    assert_eq!((ledger.quantity, ledger.version), (8, 2));

    let sync = h.synchronizer.process_available().await.expect("Sync failed");
    assert_eq!(sync.applied, 1);

    let checker = ConvergenceChecker::new(h.pool.clone(), Arc::clone(&h.cache) as _);
    let report = checker
        .wait_for_convergence(product_id, Duration::from_secs(5), Duration::from_millis(50))
        .await
        .expect("Convergence check failed");
    assert!(report.converged, "cache and ledger diverged: {report:?}");
    assert_eq!(report.cache.unwrap().quantity, 8);
    assert_eq!(report.cache.unwrap().version, 2);
}

#[tokio::test]
async fn concurrent_oversell_is_rejected_exactly_once() {
    let Some(h) = harness("oversell").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");

    let buyer = Uuid::new_v4();
    let first = h
        .lifecycle
        .create(buyer, vec![line(product_id, 6)])
        .await
        .expect("create failed");
    let second = h
        .lifecycle
        .create(buyer, vec![line(product_id, 6)])
        .await
        .expect("create failed");

    h.lifecycle
        .complete_payment(first.order_id, payment())
        .await
        .expect("complete failed");
    h.lifecycle
        .complete_payment(second.order_id, payment())
        .await
        .expect("complete failed");

    let batch = h.reconciler.process_available().await.expect("Reconcile failed");
    assert_eq!(batch.applied, 1);
    assert_eq!(batch.dead_lettered, 1);

    let ledger = ProductStock::get(&h.pool, product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.quantity, 4);
    assert!(ledger.quantity >= 0);

    let first_after = Order::find_by_id(&h.pool, first.order_id).await.unwrap().unwrap();
    let second_after = Order::find_by_id(&h.pool, second.order_id).await.unwrap().unwrap();
    let statuses = [first_after.status.as_str(), second_after.status.as_str()];
    assert!(statuses.contains(&"completed"));
    assert!(statuses.contains(&"failed"));
}

#[tokio::test]
async fn redelivered_oversell_intent_keeps_order_failed() {
    let Some(h) = harness("oversell_redelivery").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 4)
        .await
        .expect("Failed to seed stock");

    let order = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(product_id, 6)])
        .await
        .expect("create failed");
    h.lifecycle
        .complete_payment(order.order_id, payment())
        .await
        .expect("complete failed");

    // The insufficient-stock decrement rolls back its idempotency record,
    // so a redelivered copy re-hits InsufficientStock; flagging the order
    // failed again must be tolerated as a no-op.
    let intent = StockDecrementIntent::for_line_item(order.order_id, 0, product_id, 6);
    h.pgmq
        .send_json_message(&h.config.intent_queue, &intent)
        .await
        .expect("send failed");

    let batch = h.reconciler.process_available().await.expect("Reconcile failed");
    assert_eq!(batch.applied, 0);
    assert_eq!(batch.dead_lettered, 2);

    let after = Order::find_by_id(&h.pool, order.order_id).await.unwrap().unwrap();
    assert_eq!(after.status, "failed");

    let ledger = ProductStock::get(&h.pool, product_id).await.unwrap().unwrap();
    assert_eq!((ledger.quantity, ledger.version), (4, 1));
}

#[tokio::test]
async fn concurrent_transitions_on_one_order_never_collide() {
    let Some(h) = harness("concurrent_transitions").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");
    let order = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(product_id, 1)])
        .await
        .expect("create failed");

    // Two writers race on the same order's transition history. Whichever
    // loses the serialization must surface a transition refusal, never a
    // sort-key unique violation.
    let lifecycle_a = h.lifecycle.clone();
    let lifecycle_b = h.lifecycle.clone();
    let order_id = order.order_id;
    let a = tokio::spawn(async move { lifecycle_a.mark_paid(order_id).await });
    let b = tokio::spawn(async move { lifecycle_b.cancel(order_id).await });

    for outcome in [a.await.unwrap(), b.await.unwrap()] {
        match outcome {
            Ok(_) | Err(StockFlowError::InvalidTransition { .. }) => {}
            Err(e) => panic!("unexpected error from racing transition: {e}"),
        }
    }

    // Both events validate from the state they observed, so either may land
    // last; the order must end in one of their targets with a consistent
    // history, not in a half-written state.
    let after = Order::find_by_id(&h.pool, order.order_id).await.unwrap().unwrap();
    assert!(
        after.status == "cancelled" || after.status == "paid",
        "unexpected status: {}",
        after.status
    );
}

#[tokio::test]
async fn truly_concurrent_decrements_serialize_on_the_row() {
    let Some(h) = harness("row_serialization").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");

    let pool_a = h.pool.clone();
    let pool_b = h.pool.clone();
    let a = tokio::spawn(async move {
        ProductStock::conditional_decrement(&pool_a, product_id, 6, Uuid::new_v4()).await
    });
    let b = tokio::spawn(async move {
        ProductStock::conditional_decrement(&pool_b, product_id, 6, Uuid::new_v4()).await
    });

    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, DecrementOutcome::Applied { .. }))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, DecrementOutcome::InsufficientStock { available: 4 }))
        .count();
    assert_eq!((applied, rejected), (1, 1), "outcomes: {outcomes:?}");

    let ledger = ProductStock::get(&h.pool, product_id).await.unwrap().unwrap();
    assert_eq!((ledger.quantity, ledger.version), (4, 2));
}

#[tokio::test]
async fn redelivered_intent_is_a_noop() {
    let Some(h) = harness("redelivery").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");

    // Simulate broker at-least-once redelivery by enqueueing the identical
    // intent twice.
    let intent = StockDecrementIntent::for_line_item(Uuid::new_v4(), 0, product_id, 3);
    for _ in 0..2 {
        h.pgmq
            .send_json_message(&h.config.intent_queue, &intent)
            .await
            .expect("send failed");
    }

    let batch = h.reconciler.process_available().await.expect("Reconcile failed");
    assert_eq!(batch.applied, 1);
    assert_eq!(batch.duplicates, 1);
    assert_eq!(batch.dead_lettered, 0);

    let ledger = ProductStock::get(&h.pool, product_id).await.unwrap().unwrap();
    assert_eq!((ledger.quantity, ledger.version), (7, 2));

    // The duplicate republished the same authoritative pair; the cache
    // discards the second copy and still converges.
    let sync = h.synchronizer.process_available().await.expect("Sync failed");
    assert_eq!(sync.applied + sync.stale_discarded, 2);
    assert_eq!(sync.applied, 1);

    let cached = h.cache.get(product_id).await.unwrap();
    assert_eq!((cached.quantity, cached.version), (7, 2));
}

#[tokio::test]
async fn direct_conditional_decrement_is_idempotent() {
    let Some(h) = harness("idempotent_decrement").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");

    let intent_id = Uuid::new_v4();
    let first = ProductStock::conditional_decrement(&h.pool, product_id, 3, intent_id)
        .await
        .expect("decrement failed");
    assert_eq!(
        first,
        DecrementOutcome::Applied {
            new_quantity: 7,
            new_version: 2
        }
    );

    let second = ProductStock::conditional_decrement(&h.pool, product_id, 3, intent_id)
        .await
        .expect("decrement failed");
    assert_eq!(
        second,
        DecrementOutcome::AlreadyApplied {
            quantity: 7,
            version: 2
        }
    );

    let ledger = ProductStock::get(&h.pool, product_id).await.unwrap().unwrap();
    assert_eq!(ledger.quantity, 7, "stock=10 delta=3 applied twice must be 7, not 4");
}

#[tokio::test]
async fn recovery_sweep_redispatches_unstamped_orders() {
    let Some(h) = harness("recovery_sweep").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 10)
        .await
        .expect("Failed to seed stock");

    // An order whose completed transition committed but whose dispatch never
    // happened (crash window): drive the state machine directly.
    let order = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(product_id, 2)])
        .await
        .expect("create failed");
    let mut machine = OrderStateMachine::new(order.clone(), h.pool.clone());
    machine
        .transition(OrderEvent::Complete)
        .await
        .expect("transition failed");

    let dispatcher = DecrementDispatcher::new(Arc::clone(&h.pgmq), h.config.clone());
    let sweep = DispatchRecoverySweep::new(h.pool.clone(), dispatcher);
    let result = sweep.run_once().await.expect("sweep failed");
    assert!(result.orders_redispatched >= 1);

    let stamped = Order::find_by_id(&h.pool, order.order_id).await.unwrap().unwrap();
    assert!(stamped.intents_dispatched_at.is_some());

    // The redispatched intent flows through the normal path.
    let batch = h.reconciler.process_available().await.expect("Reconcile failed");
    assert!(batch.applied >= 1);
    let ledger = ProductStock::get(&h.pool, product_id).await.unwrap().unwrap();
    assert_eq!(ledger.quantity, 8);
}

#[tokio::test]
async fn lifecycle_rejects_bad_input_and_bad_transitions() {
    let Some(h) = harness("lifecycle_errors").await else { return };

    // Unknown product
    let err = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(Uuid::new_v4(), 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, StockFlowError::InvalidOrder(_)), "{err}");

    // Unknown order
    let err = h
        .lifecycle
        .complete_payment(Uuid::new_v4(), payment())
        .await
        .unwrap_err();
    assert!(matches!(err, StockFlowError::OrderNotFound(_)), "{err}");

    // Completed orders cannot be cancelled
    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 5).await.unwrap();
    let order = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(product_id, 1)])
        .await
        .unwrap();
    h.lifecycle
        .complete_payment(order.order_id, payment())
        .await
        .unwrap();
    let err = h.lifecycle.cancel(order.order_id).await.unwrap_err();
    assert!(matches!(err, StockFlowError::InvalidTransition { .. }), "{err}");

    // The paid path: pending → paid → completed, and paid cannot repeat
    let order = h
        .lifecycle
        .create(Uuid::new_v4(), vec![line(product_id, 1)])
        .await
        .unwrap();
    let paid = h.lifecycle.mark_paid(order.order_id).await.unwrap();
    assert_eq!(paid.status, "paid");
    let err = h.lifecycle.mark_paid(order.order_id).await.unwrap_err();
    assert!(matches!(err, StockFlowError::InvalidTransition { .. }), "{err}");
    let completed = h
        .lifecycle
        .complete_payment(order.order_id, payment())
        .await
        .unwrap();
    assert_eq!(completed.status, "completed");
}

#[tokio::test]
async fn cache_miss_falls_back_to_ledger_and_fills() {
    let Some(h) = harness("read_through").await else { return };

    let product_id = Uuid::new_v4();
    ProductStock::upsert(&h.pool, product_id, 12)
        .await
        .expect("Failed to seed stock");

    assert!(h.cache.get(product_id).await.is_none());

    let read = h
        .synchronizer
        .read_stock(product_id)
        .await
        .expect("read_stock failed")
        .expect("expected a ledger-backed entry");
    assert_eq!((read.quantity, read.version), (12, 1));

    // The fill is now serving reads
    assert_eq!(h.cache.get(product_id).await.unwrap().version, 1);

    // Unknown products stay misses
    let missing = h.synchronizer.read_stock(Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
}
