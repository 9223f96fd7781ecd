//! # Error Taxonomy
//!
//! Structured errors for the stock-consistency pipeline. The taxonomy follows
//! the retry contract: validation and transition errors are surfaced to the
//! caller immediately, dispatch failures are retried with backoff before being
//! surfaced, and insufficient stock is business-terminal (dead-letter, no
//! retry). Idempotent no-ops and stale cache updates are *outcomes*, not
//! errors, and never appear here.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StockFlowError {
    /// Bad order input (unknown product, empty line items, zero quantity).
    /// Never retried.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Referenced order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// The requested lifecycle transition is not legal from the order's
    /// current state.
    #[error("Invalid transition from {from} via {event}")]
    InvalidTransition { from: String, event: String },

    /// Durable publish to the message channel failed after bounded retries.
    #[error("Dispatch failure: {0}")]
    DispatchFailure(String),

    /// A decrement would drive ledger quantity negative. Business-terminal:
    /// the intent is dead-lettered and the order flagged failed.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i64,
        available: i64,
    },

    /// An intent referenced a product id with no ledger row.
    #[error("Unknown product in ledger: {0}")]
    UnknownProduct(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StockFlowError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DispatchFailure(_) | Self::Database(_) | Self::Messaging(_)
        )
    }

    /// Whether this is a terminal business failure (never retried, order is
    /// flagged failed).
    pub fn is_business_terminal(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }
}

pub type Result<T> = std::result::Result<T, StockFlowError>;
