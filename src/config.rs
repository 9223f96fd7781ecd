use crate::error::{Result, StockFlowError};

/// Pipeline configuration, populated from environment variables with
/// development defaults.
#[derive(Debug, Clone)]
pub struct StockFlowConfig {
    pub database_url: String,
    /// Max attempts for a durable publish before `DispatchFailure` surfaces.
    pub dispatch_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Messages fetched per reconciler/synchronizer poll.
    pub consumer_batch_size: i32,
    /// pgmq visibility timeout; an unacked message is redelivered after this.
    pub visibility_timeout_secs: i32,
    /// Poll delay when a queue read returns nothing.
    pub poll_interval_ms: u64,
    /// Retention for applied-intent records. Must cover the maximum
    /// redelivery window of the channel.
    pub dedup_retention_secs: i64,
    /// Queue carrying decrement intents.
    pub intent_queue: String,
    /// Queue carrying authoritative stock updates.
    pub update_queue: String,
}

impl Default for StockFlowConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/stockflow_development".to_string(),
            dispatch_max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            consumer_batch_size: 10,
            visibility_timeout_secs: 30,
            poll_interval_ms: 250,
            dedup_retention_secs: 24 * 60 * 60,
            intent_queue: crate::messaging::STOCK_DECREMENT_INTENT_QUEUE.to_string(),
            update_queue: crate::messaging::STOCK_AUTHORITATIVE_UPDATE_QUEUE.to_string(),
        }
    }
}

impl StockFlowConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(attempts) = std::env::var("STOCKFLOW_DISPATCH_MAX_ATTEMPTS") {
            config.dispatch_max_attempts = attempts.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid dispatch_max_attempts: {e}"))
            })?;
        }

        if let Ok(base) = std::env::var("STOCKFLOW_BACKOFF_BASE_MS") {
            config.backoff_base_ms = base.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid backoff_base_ms: {e}"))
            })?;
        }

        if let Ok(max) = std::env::var("STOCKFLOW_BACKOFF_MAX_MS") {
            config.backoff_max_ms = max.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid backoff_max_ms: {e}"))
            })?;
        }

        if let Ok(batch) = std::env::var("STOCKFLOW_CONSUMER_BATCH_SIZE") {
            config.consumer_batch_size = batch.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid consumer_batch_size: {e}"))
            })?;
        }

        if let Ok(vt) = std::env::var("STOCKFLOW_VISIBILITY_TIMEOUT_SECS") {
            config.visibility_timeout_secs = vt.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid visibility_timeout_secs: {e}"))
            })?;
        }

        if let Ok(poll) = std::env::var("STOCKFLOW_POLL_INTERVAL_MS") {
            config.poll_interval_ms = poll.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid poll_interval_ms: {e}"))
            })?;
        }

        if let Ok(queue) = std::env::var("STOCKFLOW_INTENT_QUEUE") {
            config.intent_queue = queue;
        }

        if let Ok(queue) = std::env::var("STOCKFLOW_UPDATE_QUEUE") {
            config.update_queue = queue;
        }

        if let Ok(retention) = std::env::var("STOCKFLOW_DEDUP_RETENTION_SECS") {
            config.dedup_retention_secs = retention.parse().map_err(|e| {
                StockFlowError::Configuration(format!("Invalid dedup_retention_secs: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Redelivery can occur any time a message sits unacked, so dedup
    /// retention shorter than the visibility timeout would let a late
    /// redelivery double-apply after the record expired.
    pub fn validate(&self) -> Result<()> {
        if self.dedup_retention_secs < i64::from(self.visibility_timeout_secs) {
            return Err(StockFlowError::Configuration(format!(
                "dedup_retention_secs ({}) must be >= visibility_timeout_secs ({})",
                self.dedup_retention_secs, self.visibility_timeout_secs
            )));
        }
        if self.dispatch_max_attempts == 0 {
            return Err(StockFlowError::Configuration(
                "dispatch_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Exponential backoff delay for the given zero-based attempt number,
    /// capped at `backoff_max_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20));
        std::time::Duration::from_millis(exp.min(self.backoff_max_ms))
    }
}
