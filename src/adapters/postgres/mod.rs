//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresSubscriptionRepository` - subscription aggregates
//! - `PostgresPaymentLedger` - payment records, idempotent on gateway payment id
//! - `PostgresWebhookEventRepository` - webhook event ledger with row-locked claims

mod payment_ledger;
mod subscription_repository;
mod webhook_event_repository;

pub use payment_ledger::PostgresPaymentLedger;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use webhook_event_repository::PostgresWebhookEventRepository;

use std::fmt;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::domain::foundation::{DomainError, ErrorCode};

/// Opens the connection pool and, unless disabled, applies `migrations/`.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    info!(pool_size = config.pool_size, "Connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.connect_timeout())
        .connect(config.url())
        .await
        .map_err(|e| db_error("connect", e))?;

    if config.migrate_on_start {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| db_error("run migrations", e))?;
        info!("Database migrations applied");
    }

    Ok(pool)
}

pub(crate) fn db_error(operation: &str, e: impl fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Failed to {}: {}", operation, e),
    )
}

/// A stored value that no longer parses into its domain type.
pub(crate) fn corrupt_column(column: &str, e: impl fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} value: {}", column, e),
    )
    .with_detail("column", column)
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
