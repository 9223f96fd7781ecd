//! # Orchestration Layer
//!
//! The pipeline workers and the order-facing entry points:
//!
//! - [`OrderLifecycle`] - create / mark_paid / complete_payment / fail / cancel
//! - [`DecrementDispatcher`] - durable publish of decrement intents
//! - [`DispatchRecoverySweep`] - redispatch for completed-but-unstamped orders
//! - [`StockReconciler`] - idempotent ledger application of intents
//! - [`CacheSynchronizer`] - versioned cache propagation and read-through

pub mod cache_synchronizer;
pub mod intent_dispatcher;
pub mod order_lifecycle;
pub mod recovery;
pub mod stock_reconciler;

pub use cache_synchronizer::{CacheSynchronizer, SyncBatchResult};
pub use intent_dispatcher::DecrementDispatcher;
pub use order_lifecycle::{OrderLifecycle, PaymentDetails};
pub use recovery::{DispatchRecoverySweep, RecoverySweepResult};
pub use stock_reconciler::{ReconcileBatchResult, StockReconciler};
