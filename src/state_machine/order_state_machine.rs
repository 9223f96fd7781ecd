use sqlx::PgPool;

use super::{
    events::OrderEvent,
    persistence::{OrderTransitionPersistence, TransitionPersistence},
    states::OrderState,
};
use crate::error::{Result, StockFlowError};
use crate::models::Order;

/// State machine for a single order's lifecycle.
///
/// The machine itself is pure bookkeeping: it resolves the current state
/// from the transition history, validates the requested event against the
/// transition table, and appends the new transition. Side effects (intent
/// dispatch, dispatch stamps) belong to the orchestration layer.
pub struct OrderStateMachine {
    order: Order,
    pool: PgPool,
    persistence: OrderTransitionPersistence,
}

impl OrderStateMachine {
    pub fn new(order: Order, pool: PgPool) -> Self {
        Self {
            order,
            pool,
            persistence: OrderTransitionPersistence,
        }
    }

    /// Get the current state of the order
    pub async fn current_state(&self) -> Result<OrderState> {
        match self
            .persistence
            .resolve_current_state(self.order.order_id, &self.pool)
            .await?
        {
            Some(state_str) => state_str.parse().map_err(|_| {
                StockFlowError::InvalidTransition {
                    from: state_str,
                    event: "unparseable state in database".to_string(),
                }
            }),
            None => Ok(OrderState::default()),
        }
    }

    /// Attempt to transition the order state
    pub async fn transition(&mut self, event: OrderEvent) -> Result<OrderState> {
        let current_state = self.current_state().await?;
        let target_state = self.determine_target_state(current_state, &event)?;

        let metadata = match &event {
            OrderEvent::Fail(reason) => Some(serde_json::json!({
                "event": event.name(),
                "reason": reason,
                "timestamp": chrono::Utc::now(),
            })),
            _ => None,
        };

        self.persistence
            .persist_transition(
                &self.order,
                Some(current_state.to_string()),
                target_state.to_string(),
                event.name(),
                metadata,
                &self.pool,
            )
            .await?;

        tracing::debug!(
            order_id = %self.order.order_id,
            from = %current_state,
            to = %target_state,
            event = event.name(),
            "Order transition persisted"
        );

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    fn determine_target_state(
        &self,
        current_state: OrderState,
        event: &OrderEvent,
    ) -> Result<OrderState> {
        let target = match (current_state, event) {
            (OrderState::Pending, OrderEvent::Pay) => OrderState::Paid,

            (OrderState::Pending, OrderEvent::Complete) => OrderState::Completed,
            (OrderState::Paid, OrderEvent::Complete) => OrderState::Completed,

            (OrderState::Pending, OrderEvent::Fail(_)) => OrderState::Failed,
            (OrderState::Paid, OrderEvent::Fail(_)) => OrderState::Failed,
            // Compensation path: a completed order whose decrement was
            // rejected for insufficient stock is flagged failed.
            (OrderState::Completed, OrderEvent::Fail(_)) => OrderState::Failed,

            (OrderState::Pending, OrderEvent::Cancel) => OrderState::Cancelled,
            (OrderState::Paid, OrderEvent::Cancel) => OrderState::Cancelled,

            (from_state, event) => {
                return Err(StockFlowError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Check if the order is in a terminal state
    pub async fn is_terminal(&self) -> Result<bool> {
        let current_state = self.current_state().await?;
        Ok(current_state.is_terminal())
    }

    pub fn order(&self) -> &Order {
        &self.order
    }
}
