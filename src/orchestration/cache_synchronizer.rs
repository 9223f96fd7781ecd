//! # Cache Synchronizer
//!
//! Applies authoritative quantity updates to the stock cache under the
//! monotonic-version rule and serves the read-through path. A stale update
//! (older or equal version after a newer one was applied) is an expected
//! consequence of out-of-order delivery: it is discarded and acknowledged,
//! logged for observability only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CachedStock, StockCache};
use crate::config::StockFlowConfig;
use crate::error::{Result, StockFlowError};
use crate::messaging::{AuthoritativeStockUpdate, PgmqClient};
use crate::models::ProductStock;

const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatchResult {
    pub applied: usize,
    pub stale_discarded: usize,
}

pub struct CacheSynchronizer {
    pool: sqlx::PgPool,
    pgmq: Arc<PgmqClient>,
    cache: Arc<dyn StockCache>,
    config: StockFlowConfig,
    healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl CacheSynchronizer {
    pub fn new(
        pool: sqlx::PgPool,
        pgmq: Arc<PgmqClient>,
        cache: Arc<dyn StockCache>,
        config: StockFlowConfig,
    ) -> Self {
        Self {
            pool,
            pgmq,
            cache,
            config,
            healthy: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Consume authoritative updates until stopped or connectivity is lost.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        info!(queue = %self.config.update_queue, "Cache synchronizer started");

        let mut consecutive_failures: u32 = 0;

        while self.running.load(Ordering::Acquire) {
            match self.process_available().await {
                Ok(result) => {
                    consecutive_failures = 0;
                    if result.applied + result.stale_discarded == 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            self.config.poll_interval_ms,
                        ))
                        .await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "Synchronizer poll failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        self.healthy.store(false, Ordering::Release);
                        self.running.store(false, Ordering::Release);
                        error!(
                            "Cache synchronizer lost connectivity, stopping consumption and signalling unhealthy"
                        );
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.backoff_delay(consecutive_failures)).await;
                }
            }
        }

        info!("Cache synchronizer stopped");
        Ok(())
    }

    /// Read one batch of updates and apply each under the version rule.
    /// Stale updates are acknowledged too - discarding them *is* the
    /// successful processing.
    pub async fn process_available(&self) -> Result<SyncBatchResult> {
        let messages = self
            .pgmq
            .read_messages(
                &self.config.update_queue,
                Some(self.config.visibility_timeout_secs),
                Some(self.config.consumer_batch_size),
            )
            .await
            .map_err(|e| StockFlowError::Messaging(e.to_string()))?;

        let mut result = SyncBatchResult::default();

        for message in messages {
            match serde_json::from_value::<AuthoritativeStockUpdate>(message.message.clone()) {
                Ok(update) => {
                    if self.apply_update(&update).await {
                        result.applied += 1;
                    } else {
                        result.stale_discarded += 1;
                    }
                }
                Err(e) => {
                    error!(
                        msg_id = message.msg_id,
                        error = %e,
                        "Unparseable authoritative update, discarding"
                    );
                }
            }

            self.pgmq
                .delete_message(&self.config.update_queue, message.msg_id)
                .await
                .map_err(|e| StockFlowError::Messaging(e.to_string()))?;
        }

        Ok(result)
    }

    /// Apply one update; returns whether the cache accepted it.
    pub async fn apply_update(&self, update: &AuthoritativeStockUpdate) -> bool {
        let applied = self
            .cache
            .set_if_newer(update.product_id, update.quantity, update.version)
            .await;

        if applied {
            debug!(
                product_id = %update.product_id,
                quantity = update.quantity,
                version = update.version,
                "Cache entry updated"
            );
        } else {
            debug!(
                product_id = %update.product_id,
                version = update.version,
                "Stale update discarded"
            );
        }

        applied
    }

    /// Cache-first read with lazy ledger fill on miss. The fill goes through
    /// `set_if_newer`, so a concurrent synchronizer write for a newer
    /// version wins over the fill.
    pub async fn read_stock(&self, product_id: uuid::Uuid) -> Result<Option<CachedStock>> {
        if let Some(cached) = self.cache.get(product_id).await {
            return Ok(Some(cached));
        }

        let Some(stock) = ProductStock::get(&self.pool, product_id).await? else {
            return Ok(None);
        };

        let filled = self
            .cache
            .set_if_newer(product_id, stock.quantity, stock.version)
            .await;

        if filled {
            debug!(
                product_id = %product_id,
                version = stock.version,
                "Cache filled from ledger on miss"
            );
            Ok(Some(CachedStock {
                quantity: stock.quantity,
                version: stock.version,
            }))
        } else {
            // A newer entry landed between the miss and the fill.
            Ok(self.cache.get(product_id).await)
        }
    }
}
