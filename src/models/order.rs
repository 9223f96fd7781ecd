//! # Order Model
//!
//! Orders and their line items. An order row carries a denormalized `status`
//! column for query surfaces; the authoritative lifecycle history is the
//! append-only `order_transitions` table written by the state machine.
//!
//! Orders are never deleted. The `intents_dispatched_at` stamp marks that
//! every line item's decrement intent was durably published; `completed`
//! orders without the stamp are picked up by the dispatch recovery sweep.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub total_amount: Decimal,
    pub status: String,
    pub intents_dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderLineItem {
    pub order_id: Uuid,
    pub line_index: i32,
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Input for order creation. Line totals and the order total are computed at
/// insert time; line items become immutable once the order leaves `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub buyer_id: Uuid,
    pub line_items: Vec<NewOrderLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderLineItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl Order {
    /// Insert the order and all line items in one transaction. The order
    /// starts in `pending`; no transition row is written until the first
    /// lifecycle event (absence of transitions resolves to the default
    /// state).
    pub async fn create(pool: &PgPool, new_order: &NewOrder) -> Result<Order, sqlx::Error> {
        let order_id = Uuid::new_v4();
        let total_amount: Decimal = new_order
            .line_items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let mut tx = pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_id, buyer_id, total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', NOW(), NOW())
            RETURNING order_id, buyer_id, total_amount, status, intents_dispatched_at,
                      created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(new_order.buyer_id)
        .bind(total_amount)
        .fetch_one(&mut *tx)
        .await?;

        for (index, item) in new_order.line_items.iter().enumerate() {
            let line_total = item.unit_price * Decimal::from(item.quantity);
            sqlx::query(
                r#"
                INSERT INTO order_line_items
                    (order_id, line_index, product_id, quantity, unit_price, line_total)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(index as i32)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(line_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    pub async fn find_by_id(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, buyer_id, total_amount, status, intents_dispatched_at,
                   created_at, updated_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(pool)
        .await
    }

    /// Line items ordered by their position within the order. The position
    /// is the idempotency anchor: intent ids derive from (order_id,
    /// line_index).
    pub async fn line_items(
        pool: &PgPool,
        order_id: Uuid,
    ) -> Result<Vec<OrderLineItem>, sqlx::Error> {
        sqlx::query_as::<_, OrderLineItem>(
            r#"
            SELECT order_id, line_index, product_id, quantity, unit_price, line_total
            FROM order_line_items
            WHERE order_id = $1
            ORDER BY line_index
            "#,
        )
        .bind(order_id)
        .fetch_all(pool)
        .await
    }

    /// Stamp the order once every decrement intent has been acknowledged as
    /// durably published.
    pub async fn mark_intents_dispatched(
        pool: &PgPool,
        order_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET intents_dispatched_at = NOW(), updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Completed orders whose intents were never fully published (crash
    /// between the completed transition and the dispatch stamp). Input for
    /// the recovery sweep.
    pub async fn find_completed_undispatched(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, buyer_id, total_amount, status, intents_dispatched_at,
                   created_at, updated_at
            FROM orders
            WHERE status = 'completed' AND intents_dispatched_at IS NULL
            ORDER BY updated_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
