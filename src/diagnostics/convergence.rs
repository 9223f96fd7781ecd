//! # Convergence Checker
//!
//! Polls the ledger and the cache for a product and reports whether they
//! agree. The pipeline's contract is eventual convergence: once all
//! in-flight intents for a product are processed and no new orders arrive,
//! cache and ledger quantities must match within a bounded window.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CachedStock, StockCache};
use crate::error::Result;
use crate::models::ProductStock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub product_id: uuid::Uuid,
    pub ledger: Option<CachedStock>,
    pub cache: Option<CachedStock>,
    pub converged: bool,
}

pub struct ConvergenceChecker {
    pool: sqlx::PgPool,
    cache: Arc<dyn StockCache>,
}

impl ConvergenceChecker {
    pub fn new(pool: sqlx::PgPool, cache: Arc<dyn StockCache>) -> Self {
        Self { pool, cache }
    }

    /// One-shot comparison. An absent cache entry counts as converged only
    /// when the ledger has no row either - a populated ledger with an empty
    /// cache is lag, not agreement.
    pub async fn check(&self, product_id: uuid::Uuid) -> Result<ConvergenceReport> {
        let ledger = ProductStock::get(&self.pool, product_id)
            .await?
            .map(|stock| CachedStock {
                quantity: stock.quantity,
                version: stock.version,
            });
        let cache = self.cache.get(product_id).await;

        let converged = match (&ledger, &cache) {
            (Some(l), Some(c)) => l.quantity == c.quantity && l.version == c.version,
            (None, None) => true,
            _ => false,
        };

        Ok(ConvergenceReport {
            product_id,
            ledger,
            cache,
            converged,
        })
    }

    /// Poll until convergence or until `timeout` elapses; returns the last
    /// report either way.
    pub async fn wait_for_convergence(
        &self,
        product_id: uuid::Uuid,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ConvergenceReport> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let report = self.check(product_id).await?;
            if report.converged || tokio::time::Instant::now() >= deadline {
                debug!(
                    product_id = %product_id,
                    converged = report.converged,
                    "Convergence check finished"
                );
                return Ok(report);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
