//! # Dispatch Recovery Sweep
//!
//! Closes the at-least-once gap in `complete_payment`: orders whose
//! `completed` transition committed but whose intents were never all
//! acknowledged stay unstamped, and this sweep redispatches them. Because
//! intent ids are deterministic per (order, line index), redispatch can
//! duplicate messages but never creates semantically new intents.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::Order;
use crate::orchestration::intent_dispatcher::DecrementDispatcher;

#[derive(Debug, Clone, Default)]
pub struct RecoverySweepResult {
    pub orders_scanned: usize,
    pub orders_redispatched: usize,
    pub warnings: Vec<String>,
}

pub struct DispatchRecoverySweep {
    pool: PgPool,
    dispatcher: DecrementDispatcher,
    batch_limit: i64,
}

impl DispatchRecoverySweep {
    pub fn new(pool: PgPool, dispatcher: DecrementDispatcher) -> Self {
        Self {
            pool,
            dispatcher,
            batch_limit: 100,
        }
    }

    /// Scan one batch of completed-but-unstamped orders and redispatch their
    /// intents. One failing order does not stop the sweep; it is reported as
    /// a warning and retried on the next pass.
    pub async fn run_once(&self) -> Result<RecoverySweepResult> {
        let orders = Order::find_completed_undispatched(&self.pool, self.batch_limit).await?;
        let mut result = RecoverySweepResult {
            orders_scanned: orders.len(),
            ..Default::default()
        };

        for order in &orders {
            let line_items = match Order::line_items(&self.pool, order.order_id).await {
                Ok(items) => items,
                Err(e) => {
                    result
                        .warnings
                        .push(format!("order {}: line item load failed: {e}", order.order_id));
                    continue;
                }
            };

            match self
                .dispatcher
                .dispatch_order_intents(order, &line_items)
                .await
            {
                Ok(_) => {
                    Order::mark_intents_dispatched(&self.pool, order.order_id).await?;
                    result.orders_redispatched += 1;
                    info!(
                        order_id = %order.order_id,
                        intents = line_items.len(),
                        "Recovered undispatched order"
                    );
                }
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        error = %e,
                        "Recovery redispatch failed, will retry on next sweep"
                    );
                    result
                        .warnings
                        .push(format!("order {}: redispatch failed: {e}", order.order_id));
                }
            }
        }

        if result.orders_scanned > 0 {
            info!(
                scanned = result.orders_scanned,
                redispatched = result.orders_redispatched,
                warnings = result.warnings.len(),
                "Dispatch recovery sweep finished"
            );
        }

        Ok(result)
    }
}
