//! # Product Stock Ledger
//!
//! The authoritative quantity/version pair per product. Quantity never goes
//! negative; version strictly increases on every successful mutation, which
//! is what lets downstream caches order updates without relying on delivery
//! order.
//!
//! `conditional_decrement` is the only write path used by the reconciler. It
//! commits the idempotency record and the quantity/version change in a single
//! transaction, holding a `FOR UPDATE` row lock so concurrent decrements for
//! the same product serialize while distinct products proceed in parallel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProductStock {
    pub product_id: Uuid,
    pub quantity: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a conditional decrement. `AlreadyApplied` and
/// `InsufficientStock` are expected outcomes of at-least-once delivery, not
/// errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// The decrement was applied; carries the new authoritative pair.
    Applied { new_quantity: i64, new_version: i64 },
    /// The intent id was seen before; the ledger is unchanged. Carries the
    /// current authoritative pair so callers can still propagate it.
    AlreadyApplied { quantity: i64, version: i64 },
    /// Applying the delta would drive quantity negative; nothing changed.
    InsufficientStock { available: i64 },
}

impl ProductStock {
    pub async fn get(
        pool: &PgPool,
        product_id: Uuid,
    ) -> Result<Option<ProductStock>, sqlx::Error> {
        sqlx::query_as::<_, ProductStock>(
            r#"
            SELECT product_id, quantity, version, updated_at
            FROM product_stock
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(pool)
        .await
    }

    /// Seed or restock a product. Bumps the version so caches converge onto
    /// the restocked value through the normal update rule.
    pub async fn upsert(
        pool: &PgPool,
        product_id: Uuid,
        quantity: i64,
    ) -> Result<ProductStock, sqlx::Error> {
        sqlx::query_as::<_, ProductStock>(
            r#"
            INSERT INTO product_stock (product_id, quantity, version, updated_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (product_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                version = product_stock.version + 1,
                updated_at = NOW()
            RETURNING product_id, quantity, version, updated_at
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_one(pool)
        .await
    }

    /// Product ids from `product_ids` that have no ledger row. Used by order
    /// creation to reject unknown products.
    pub async fn find_missing(
        pool: &PgPool,
        product_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let known: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT product_id
            FROM product_stock
            WHERE product_id = ANY($1)
            "#,
        )
        .bind(product_ids)
        .fetch_all(pool)
        .await?;

        let known: std::collections::HashSet<Uuid> = known.into_iter().map(|r| r.0).collect();
        Ok(product_ids
            .iter()
            .filter(|id| !known.contains(id))
            .copied()
            .collect())
    }

    /// Apply a decrement exactly-once-in-effect.
    ///
    /// One transaction covers the idempotency insert and the conditional
    /// update, so a consumer crash mid-apply leaves no partial state. A
    /// duplicate intent id hits the `ON CONFLICT DO NOTHING` and is reported
    /// as `AlreadyApplied` without touching the quantity. Insufficient stock
    /// rolls the whole transaction back (including the idempotency record),
    /// leaving the ledger untouched.
    pub async fn conditional_decrement(
        pool: &PgPool,
        product_id: Uuid,
        delta: i64,
        intent_id: Uuid,
    ) -> crate::error::Result<DecrementOutcome> {
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_applied_intents (intent_id, product_id, applied_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (intent_id) DO NOTHING
            "#,
        )
        .bind(intent_id)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let current = Self::get(pool, product_id)
                .await?
                .ok_or(crate::error::StockFlowError::UnknownProduct(product_id))?;
            return Ok(DecrementOutcome::AlreadyApplied {
                quantity: current.quantity,
                version: current.version,
            });
        }

        // Per-product critical section: concurrent decrements for the same
        // product queue on this row lock and never observe the same
        // pre-decrement quantity.
        let stock = sqlx::query_as::<_, ProductStock>(
            r#"
            SELECT product_id, quantity, version, updated_at
            FROM product_stock
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stock) = stock else {
            tx.rollback().await?;
            return Err(crate::error::StockFlowError::UnknownProduct(product_id));
        };

        if stock.quantity < delta {
            tx.rollback().await?;
            return Ok(DecrementOutcome::InsufficientStock {
                available: stock.quantity,
            });
        }

        let updated = sqlx::query_as::<_, ProductStock>(
            r#"
            UPDATE product_stock
            SET quantity = quantity - $2,
                version = version + 1,
                updated_at = NOW()
            WHERE product_id = $1
            RETURNING product_id, quantity, version, updated_at
            "#,
        )
        .bind(product_id)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DecrementOutcome::Applied {
            new_quantity: updated.quantity,
            new_version: updated.version,
        })
    }

    /// Delete idempotency records older than the retention window. Safe
    /// because the channel cannot redeliver a message after that window.
    pub async fn purge_expired_intents(
        pool: &PgPool,
        retention_secs: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM stock_applied_intents
            WHERE applied_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(retention_secs)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_equality() {
        assert_eq!(
            DecrementOutcome::Applied {
                new_quantity: 8,
                new_version: 2
            },
            DecrementOutcome::Applied {
                new_quantity: 8,
                new_version: 2
            }
        );
        assert_ne!(
            DecrementOutcome::InsufficientStock { available: 4 },
            DecrementOutcome::AlreadyApplied {
                quantity: 4,
                version: 3
            }
        );
    }

    #[test]
    fn test_product_stock_serde() {
        let stock = ProductStock {
            product_id: Uuid::new_v4(),
            quantity: 10,
            version: 1,
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&stock).expect("Failed to serialize");
        let parsed: ProductStock = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(stock, parsed);
    }
}
