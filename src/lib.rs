#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # StockFlow Core
//!
//! The order-completion / stock-consistency pipeline: when an order's
//! payment completes, committed stock is decremented exactly once in the
//! authoritative ledger, and a read-optimized cache converges to the same
//! value - even though the decrement is asynchronous and may be retried,
//! delayed, duplicated, or observed mid-flight by readers.
//!
//! ## Architecture
//!
//! ```text
//! OrderLifecycle ──▶ DecrementDispatcher ──▶ [stock_decrement_intent]
//!                                                     │
//!                                             StockReconciler
//!                                          (ledger txn + row lock)
//!                                                     │
//!                                      [stock_authoritative_update]
//!                                                     │
//!                                            CacheSynchronizer ──▶ StockCache
//! ```
//!
//! Both queues are PostgreSQL message queues (pgmq): durable, at-least-once,
//! with visibility-timeout redelivery. The reconciler absorbs duplicates
//! through per-intent idempotency records committed atomically with the
//! decrement; the cache absorbs reordering through a strictly-increasing
//! version on every ledger mutation.
//!
//! ## Consistency contract
//!
//! - Ledger quantity never goes negative; an intent that would oversell is
//!   dead-lettered and the order is flagged failed.
//! - Applying the same intent twice changes the ledger once.
//! - The cache may lag the ledger but never regresses to an older version.
//! - After in-flight intents drain, cache equals ledger (see
//!   [`diagnostics::ConvergenceChecker`]).
//!
//! ## Module Organization
//!
//! - [`models`] - ledger data layer (orders, line items, product stock)
//! - [`state_machine`] - order lifecycle transitions with append-only history
//! - [`messaging`] - pgmq client and wire contracts
//! - [`orchestration`] - dispatcher, reconciler, synchronizer, recovery sweep
//! - [`cache`] - versioned stock cache
//! - [`diagnostics`] - ledger/cache convergence oracle
//! - [`config`] / [`error`] / [`logging`] / [`database`] - ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockflow_core::cache::InMemoryStockCache;
//! use stockflow_core::config::StockFlowConfig;
//! use stockflow_core::messaging::PgmqClient;
//! use stockflow_core::orchestration::{
//!     CacheSynchronizer, DecrementDispatcher, OrderLifecycle, StockReconciler,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = StockFlowConfig::from_env()?;
//! let pool = sqlx::PgPool::connect(&config.database_url).await?;
//! let pgmq = Arc::new(PgmqClient::new_with_pool(pool.clone()).await);
//! pgmq.initialize_pipeline_queues(&config.intent_queue, &config.update_queue)
//!     .await?;
//!
//! let dispatcher = DecrementDispatcher::new(Arc::clone(&pgmq), config.clone());
//! let lifecycle = OrderLifecycle::new(pool.clone(), dispatcher);
//!
//! let cache = Arc::new(InMemoryStockCache::new());
//! let reconciler = StockReconciler::new(pool.clone(), Arc::clone(&pgmq), config.clone());
//! let synchronizer = CacheSynchronizer::new(pool, pgmq, cache, config);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;

pub use cache::{CachedStock, InMemoryStockCache, StockCache};
pub use config::StockFlowConfig;
pub use error::{Result, StockFlowError};
pub use models::{DecrementOutcome, Order, OrderLineItem, ProductStock};
pub use orchestration::{
    CacheSynchronizer, DecrementDispatcher, DispatchRecoverySweep, OrderLifecycle,
    StockReconciler,
};
pub use state_machine::{OrderEvent, OrderState, OrderStateMachine};
