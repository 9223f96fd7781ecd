//! # Decrement Dispatcher
//!
//! Pure hand-off between order completion and the message channel. A
//! dispatch succeeds only once pgmq has committed the message row (durable
//! publish); transient failures are retried with capped exponential backoff
//! and surface as `DispatchFailure` when attempts are exhausted, so the
//! caller never silently drops an intent.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::StockFlowConfig;
use crate::error::{Result, StockFlowError};
use crate::messaging::{PgmqClient, StockDecrementIntent};
use crate::models::{Order, OrderLineItem};

#[derive(Clone)]
pub struct DecrementDispatcher {
    pgmq: Arc<PgmqClient>,
    config: StockFlowConfig,
}

impl DecrementDispatcher {
    pub fn new(pgmq: Arc<PgmqClient>, config: StockFlowConfig) -> Self {
        Self { pgmq, config }
    }

    /// Publish a single intent, retrying with backoff. Returns the broker
    /// message id of the durable publish.
    pub async fn dispatch(&self, intent: &StockDecrementIntent) -> Result<i64> {
        let mut last_error = String::new();

        for attempt in 0..self.config.dispatch_max_attempts {
            match self
                .pgmq
                .send_json_message(&self.config.intent_queue, intent)
                .await
            {
                Ok(message_id) => {
                    debug!(
                        intent_id = %intent.intent_id,
                        order_id = %intent.order_id,
                        product_id = %intent.product_id,
                        message_id,
                        "Decrement intent published"
                    );
                    return Ok(message_id);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        intent_id = %intent.intent_id,
                        attempt = attempt + 1,
                        max_attempts = self.config.dispatch_max_attempts,
                        error = %last_error,
                        "Intent publish failed, backing off"
                    );
                    if attempt + 1 < self.config.dispatch_max_attempts {
                        tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(StockFlowError::DispatchFailure(format!(
            "intent {} not published after {} attempts: {last_error}",
            intent.intent_id, self.config.dispatch_max_attempts
        )))
    }

    /// Publish one intent per line item of a completed order. Intent ids are
    /// deterministic, so calling this again for the same order (recovery
    /// sweep, crash replay) republishes the same intents rather than minting
    /// new ones.
    pub async fn dispatch_order_intents(
        &self,
        order: &Order,
        line_items: &[OrderLineItem],
    ) -> Result<usize> {
        for item in line_items {
            let intent = StockDecrementIntent::for_line_item(
                order.order_id,
                item.line_index,
                item.product_id,
                item.quantity,
            );
            self.dispatch(&intent).await?;
        }

        debug!(
            order_id = %order.order_id,
            intents = line_items.len(),
            "All decrement intents published for order"
        );
        Ok(line_items.len())
    }
}
