//! # Stock Reconciler
//!
//! Consumes decrement intents and applies them to the ledger
//! exactly-once-in-effect under at-least-once delivery. The ledger write and
//! the idempotency record commit in one transaction behind a per-product row
//! lock; only after the commit is the authoritative update published and the
//! message acknowledged. A crash between commit and ack causes a redelivery
//! that lands on the idempotency record and republishes the current
//! authoritative value, so the cache still converges.
//!
//! Insufficient stock is a terminal business outcome, not a retry: the
//! intent is archived (dead letter) and the responsible order is flagged
//! failed. Oversell prevention takes priority over order completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::StockFlowConfig;
use crate::error::{Result, StockFlowError};
use crate::logging::log_reconcile_operation;
use crate::messaging::{AuthoritativeStockUpdate, PgmqClient, StockDecrementIntent};
use crate::models::{DecrementOutcome, Order, ProductStock};
use crate::state_machine::{OrderEvent, OrderStateMachine};

/// Consecutive poll failures before the worker gives up and goes unhealthy.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Idle polls between opportunistic purges of expired idempotency records.
const PURGE_EVERY_IDLE_POLLS: u32 = 240;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileBatchResult {
    pub applied: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

pub struct StockReconciler {
    pool: sqlx::PgPool,
    pgmq: Arc<PgmqClient>,
    config: StockFlowConfig,
    healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl StockReconciler {
    pub fn new(pool: sqlx::PgPool, pgmq: Arc<PgmqClient>, config: StockFlowConfig) -> Self {
        Self {
            pool,
            pgmq,
            config,
            healthy: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the worker considers itself fit to consume. Flips to false on
    /// sustained ledger/channel connectivity loss and stays false until
    /// restart.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Consume until [`stop`](Self::stop) is called or connectivity is lost.
    /// On sustained failure the worker stops consuming and signals unhealthy
    /// rather than proceeding with undefined state.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        info!(queue = %self.config.intent_queue, "Stock reconciler started");

        let mut consecutive_failures: u32 = 0;
        let mut idle_polls: u32 = 0;

        while self.running.load(Ordering::Acquire) {
            match self.process_available().await {
                Ok(result) => {
                    consecutive_failures = 0;
                    let processed = result.applied + result.duplicates + result.dead_lettered;
                    if processed == 0 {
                        idle_polls += 1;
                        if idle_polls % PURGE_EVERY_IDLE_POLLS == 0 {
                            if let Err(e) = ProductStock::purge_expired_intents(
                                &self.pool,
                                self.config.dedup_retention_secs,
                            )
                            .await
                            {
                                warn!(error = %e, "Idempotency record purge failed");
                            }
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(
                            self.config.poll_interval_ms,
                        ))
                        .await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        error = %e,
                        consecutive_failures,
                        "Reconciler poll failed"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        self.healthy.store(false, Ordering::Release);
                        self.running.store(false, Ordering::Release);
                        error!(
                            "Stock reconciler lost connectivity, stopping consumption and signalling unhealthy"
                        );
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.backoff_delay(consecutive_failures)).await;
                }
            }
        }

        info!("Stock reconciler stopped");
        Ok(())
    }

    /// Read one batch of intents and apply each independently.
    pub async fn process_available(&self) -> Result<ReconcileBatchResult> {
        let messages = self
            .pgmq
            .read_messages(
                &self.config.intent_queue,
                Some(self.config.visibility_timeout_secs),
                Some(self.config.consumer_batch_size),
            )
            .await
            .map_err(|e| StockFlowError::Messaging(e.to_string()))?;

        let mut result = ReconcileBatchResult::default();

        for message in messages {
            let intent: StockDecrementIntent =
                match serde_json::from_value(message.message.clone()) {
                    Ok(intent) => intent,
                    Err(e) => {
                        error!(
                            msg_id = message.msg_id,
                            error = %e,
                            "Unparseable intent payload, dead-lettering"
                        );
                        self.archive(message.msg_id).await?;
                        result.dead_lettered += 1;
                        continue;
                    }
                };

            self.apply_intent(message.msg_id, &intent, &mut result)
                .await?;
        }

        Ok(result)
    }

    async fn apply_intent(
        &self,
        msg_id: i64,
        intent: &StockDecrementIntent,
        result: &mut ReconcileBatchResult,
    ) -> Result<()> {
        let outcome = ProductStock::conditional_decrement(
            &self.pool,
            intent.product_id,
            intent.quantity,
            intent.intent_id,
        )
        .await;

        match outcome {
            Ok(DecrementOutcome::Applied {
                new_quantity,
                new_version,
            }) => {
                log_reconcile_operation(
                    "decrement",
                    intent.product_id,
                    Some(intent.intent_id),
                    "applied",
                    Some(&format!("quantity={new_quantity} version={new_version}")),
                );
                // Publish after commit; ack only after publish. If the
                // publish fails the message stays visible and the redelivery
                // republishes via the AlreadyApplied path.
                if let Err(e) = self
                    .publish_authoritative(intent.product_id, new_quantity, new_version)
                    .await
                {
                    warn!(
                        intent_id = %intent.intent_id,
                        error = %e,
                        "Authoritative publish failed after commit, leaving message for redelivery"
                    );
                    result.applied += 1;
                    return Ok(());
                }
                self.delete(msg_id).await?;
                result.applied += 1;
            }
            Ok(DecrementOutcome::AlreadyApplied { quantity, version }) => {
                debug!(
                    intent_id = %intent.intent_id,
                    product_id = %intent.product_id,
                    "Duplicate intent acknowledged as no-op"
                );
                // Heal the crash-between-commit-and-publish window; a stale
                // republish is discarded by the cache's version rule.
                if let Err(e) = self
                    .publish_authoritative(intent.product_id, quantity, version)
                    .await
                {
                    warn!(
                        intent_id = %intent.intent_id,
                        error = %e,
                        "Authoritative republish failed, leaving message for redelivery"
                    );
                    result.duplicates += 1;
                    return Ok(());
                }
                self.delete(msg_id).await?;
                result.duplicates += 1;
            }
            Ok(DecrementOutcome::InsufficientStock { available }) => {
                log_reconcile_operation(
                    "decrement",
                    intent.product_id,
                    Some(intent.intent_id),
                    "insufficient_stock",
                    Some(&format!(
                        "requested={} available={available}",
                        intent.quantity
                    )),
                );
                // Flag before archiving. The decrement rolled back, so if
                // the flag write dies here the redelivered intent re-hits
                // InsufficientStock and retries it; archiving first would
                // strand a completed order with no live intent.
                self.fail_order_for_oversell(intent, available).await?;
                self.archive(msg_id).await?;
                result.dead_lettered += 1;
            }
            Err(StockFlowError::UnknownProduct(product_id)) => {
                error!(
                    intent_id = %intent.intent_id,
                    product_id = %product_id,
                    "Intent references unknown product, dead-lettering"
                );
                self.archive(msg_id).await?;
                result.dead_lettered += 1;
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Flag the order behind an oversold intent as failed. The order may
    /// already be failed when several of its line items oversell; that
    /// repeat transition is ignored.
    async fn fail_order_for_oversell(
        &self,
        intent: &StockDecrementIntent,
        available: i64,
    ) -> Result<()> {
        let Some(order) = Order::find_by_id(&self.pool, intent.order_id).await? else {
            warn!(
                order_id = %intent.order_id,
                "Oversold intent references missing order"
            );
            return Ok(());
        };

        let reason = format!(
            "insufficient stock for product {}: requested {}, available {available}",
            intent.product_id, intent.quantity
        );

        let mut machine = OrderStateMachine::new(order, self.pool.clone());
        match machine.transition(OrderEvent::Fail(reason.clone())).await {
            Ok(_) => {
                info!(order_id = %intent.order_id, reason = %reason, "Order flagged failed");
                Ok(())
            }
            Err(StockFlowError::InvalidTransition { .. }) => {
                debug!(
                    order_id = %intent.order_id,
                    "Order already in a terminal failure state"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn publish_authoritative(
        &self,
        product_id: uuid::Uuid,
        quantity: i64,
        version: i64,
    ) -> Result<i64> {
        let update = AuthoritativeStockUpdate {
            product_id,
            quantity,
            version,
            updated_at: chrono::Utc::now(),
        };

        self.pgmq
            .send_json_message(&self.config.update_queue, &update)
            .await
            .map_err(|e| StockFlowError::Messaging(e.to_string()))
    }

    async fn delete(&self, msg_id: i64) -> Result<()> {
        self.pgmq
            .delete_message(&self.config.intent_queue, msg_id)
            .await
            .map_err(|e| StockFlowError::Messaging(e.to_string()))
    }

    async fn archive(&self, msg_id: i64) -> Result<()> {
        self.pgmq
            .archive_message(&self.config.intent_queue, msg_id)
            .await
            .map_err(|e| StockFlowError::Messaging(e.to_string()))
    }
}
