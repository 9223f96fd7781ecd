//! # Order Lifecycle
//!
//! The order-facing contract of the pipeline. `complete_payment` is the only
//! inbound trigger from the surrounding order/payment API layer: it persists
//! the `completed` transition and hands every line item to the dispatcher
//! within the same logical unit of work. The hand-off is at-least-once - if
//! the process dies after the transition commits but before all publishes
//! are acknowledged, the order stays unstamped and the recovery sweep
//! redispatches.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StockFlowError};
use crate::logging::log_order_operation;
use crate::models::{NewOrder, NewOrderLineItem, Order, ProductStock};
use crate::orchestration::intent_dispatcher::DecrementDispatcher;
use crate::state_machine::{OrderEvent, OrderStateMachine};

/// Payment confirmation passed in by the (out-of-scope) payment layer.
/// Recorded in logs only; the pipeline does not verify payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub method: String,
    pub reference: String,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    pool: PgPool,
    dispatcher: DecrementDispatcher,
}

impl OrderLifecycle {
    pub fn new(pool: PgPool, dispatcher: DecrementDispatcher) -> Self {
        Self { pool, dispatcher }
    }

    /// Create a new order in `pending`.
    ///
    /// Validates that line items exist, every quantity is >= 1, and every
    /// product id has a ledger row. No stock is reserved here - a deliberate
    /// trade of availability guarantees for simplicity, which means an
    /// accepted order can still fail at payment completion with
    /// insufficient stock.
    pub async fn create(
        &self,
        buyer_id: Uuid,
        line_items: Vec<NewOrderLineItem>,
    ) -> Result<Order> {
        if line_items.is_empty() {
            return Err(StockFlowError::InvalidOrder(
                "order must contain at least one line item".to_string(),
            ));
        }

        for (index, item) in line_items.iter().enumerate() {
            if item.quantity < 1 {
                return Err(StockFlowError::InvalidOrder(format!(
                    "line item {index} has quantity {}, must be >= 1",
                    item.quantity
                )));
            }
        }

        let product_ids: Vec<Uuid> = line_items.iter().map(|item| item.product_id).collect();
        let missing = ProductStock::find_missing(&self.pool, &product_ids).await?;
        if !missing.is_empty() {
            return Err(StockFlowError::InvalidOrder(format!(
                "unknown product ids: {missing:?}"
            )));
        }

        let order = Order::create(
            &self.pool,
            &NewOrder {
                buyer_id,
                line_items,
            },
        )
        .await?;

        log_order_operation("create", order.order_id, "pending", None);
        Ok(order)
    }

    /// Record payment authorization ahead of completion (pending → paid).
    /// Carries no stock side effects; intents are emitted only on
    /// completion.
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<Order> {
        let order = Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))?;

        let mut machine = OrderStateMachine::new(order, self.pool.clone());
        machine.transition(OrderEvent::Pay).await?;

        log_order_operation("mark_paid", order_id, "paid", None);

        Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))
    }

    /// Complete payment for an order and emit one decrement intent per line
    /// item.
    ///
    /// Fails with `OrderNotFound` for unknown orders and `InvalidTransition`
    /// unless the order is `pending` or `paid`. Blocks on the durable
    /// publish acknowledgment for each intent, but never on downstream
    /// reconciliation - ledger and cache convergence are asynchronous.
    pub async fn complete_payment(
        &self,
        order_id: Uuid,
        payment: PaymentDetails,
    ) -> Result<Order> {
        let order = Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))?;

        let mut machine = OrderStateMachine::new(order.clone(), self.pool.clone());
        machine.transition(OrderEvent::Complete).await?;

        log_order_operation(
            "complete_payment",
            order_id,
            "completed",
            Some(&format!("method={} reference={}", payment.method, payment.reference)),
        );

        // The completed transition is durable at this point. Dispatch every
        // intent, then stamp; a crash in between leaves the order to the
        // recovery sweep, and deterministic intent ids make the redispatch
        // harmless.
        let line_items = Order::line_items(&self.pool, order_id).await?;
        self.dispatcher
            .dispatch_order_intents(&order, &line_items)
            .await?;
        Order::mark_intents_dispatched(&self.pool, order_id).await?;

        Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))
    }

    /// Terminal failure with no stock side effects.
    pub async fn fail(&self, order_id: Uuid, reason: &str) -> Result<Order> {
        let order = Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))?;

        let mut machine = OrderStateMachine::new(order, self.pool.clone());
        machine
            .transition(OrderEvent::Fail(reason.to_string()))
            .await?;

        log_order_operation("fail", order_id, "failed", Some(reason));

        Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))
    }

    /// Cancel an order that has not completed. Completed orders are refused
    /// (`InvalidTransition`); reversal of completed orders is a refund flow
    /// outside this crate.
    pub async fn cancel(&self, order_id: Uuid) -> Result<Order> {
        let order = Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))?;

        let mut machine = OrderStateMachine::new(order, self.pool.clone());
        machine.transition(OrderEvent::Cancel).await?;

        log_order_operation("cancel", order_id, "cancelled", None);

        Order::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(StockFlowError::OrderNotFound(order_id))
    }
}
