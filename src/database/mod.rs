//! # Database Module
//!
//! Connection management and schema migrations for the durable ledger.

pub mod connection;

pub use connection::DatabaseConnection;

/// Apply pending schema migrations from the `migrations/` directory.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
