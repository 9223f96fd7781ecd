//! # Message Structures for pgmq Queues
//!
//! Wire contracts between the pipeline stages. Intents flow from order
//! completion to the reconciler; authoritative updates flow from the
//! reconciler to the cache synchronizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue carrying `StockDecrementIntent` messages
pub const STOCK_DECREMENT_INTENT_QUEUE: &str = "stock_decrement_intent";

/// Queue carrying `AuthoritativeStockUpdate` messages
pub const STOCK_AUTHORITATIVE_UPDATE_QUEUE: &str = "stock_authoritative_update";

/// A request to subtract committed stock for one order line item.
///
/// The intent id is a deterministic function of (order id, line index), so a
/// redispatch after a crash or a broker redelivery never creates a
/// semantically new intent - the reconciler's idempotency record absorbs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDecrementIntent {
    pub intent_id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub line_index: i32,
    pub quantity: i64,
    pub emitted_at: DateTime<Utc>,
}

impl StockDecrementIntent {
    pub fn for_line_item(order_id: Uuid, line_index: i32, product_id: Uuid, quantity: i64) -> Self {
        Self {
            intent_id: deterministic_intent_id(order_id, line_index),
            order_id,
            product_id,
            line_index,
            quantity,
            emitted_at: Utc::now(),
        }
    }
}

/// UUIDv5 of the line index within the order id namespace.
pub fn deterministic_intent_id(order_id: Uuid, line_index: i32) -> Uuid {
    Uuid::new_v5(&order_id, &line_index.to_be_bytes())
}

/// The new authoritative quantity/version pair after a successful ledger
/// mutation, published for cache propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeStockUpdate {
    pub product_id: Uuid,
    pub quantity: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
