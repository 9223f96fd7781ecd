use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Order;

/// Trait for persisting order state transitions
#[async_trait]
pub trait TransitionPersistence: Send + Sync {
    /// Persist a state transition and keep the denormalized order status in
    /// step, in one transaction
    async fn persist_transition(
        &self,
        order: &Order,
        from_state: Option<String>,
        to_state: String,
        event: &str,
        metadata: Option<Value>,
        pool: &PgPool,
    ) -> Result<()>;

    /// Resolve the current state from persisted transitions
    async fn resolve_current_state(
        &self,
        order_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<String>>;
}

/// Order transition persistence over the append-only `order_transitions`
/// table (sort_key ordering, single `most_recent` row per order)
pub struct OrderTransitionPersistence;

#[async_trait]
impl TransitionPersistence for OrderTransitionPersistence {
    async fn persist_transition(
        &self,
        order: &Order,
        from_state: Option<String>,
        to_state: String,
        event: &str,
        metadata: Option<Value>,
        pool: &PgPool,
    ) -> Result<()> {
        let transition_metadata = metadata.unwrap_or_else(|| {
            serde_json::json!({
                "event": event,
                "timestamp": Utc::now(),
            })
        });

        let mut tx = pool.begin().await?;

        // Concurrent transitions for one order serialize on the order row,
        // so sort keys computed below never collide.
        sqlx::query("SELECT order_id FROM orders WHERE order_id = $1 FOR UPDATE")
            .bind(order.order_id)
            .execute(&mut *tx)
            .await?;

        let next_key: (Option<i32>,) = sqlx::query_as(
            r#"
            SELECT MAX(sort_key) + 1
            FROM order_transitions
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .fetch_one(&mut *tx)
        .await?;
        let sort_key = next_key.0.unwrap_or(1);

        sqlx::query(
            r#"
            INSERT INTO order_transitions
                (order_id, from_state, to_state, sort_key, most_recent, metadata)
            VALUES ($1, $2, $3, $4, true, $5)
            "#,
        )
        .bind(order.order_id)
        .bind(&from_state)
        .bind(&to_state)
        .bind(sort_key)
        .bind(&transition_metadata)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE order_transitions
            SET most_recent = false
            WHERE order_id = $1 AND sort_key < $2
            "#,
        )
        .bind(order.order_id)
        .bind(sort_key)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .bind(&to_state)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_current_state(
        &self,
        order_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT to_state
            FROM order_transitions
            WHERE order_id = $1 AND most_recent = true
            ORDER BY sort_key DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| r.0))
    }
}
