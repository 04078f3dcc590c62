//! PostgreSQL implementation of PaymentLedger.
//!
//! Idempotence comes from the partial unique index on
//! `(gateway, gateway_payment_id)`: `ON CONFLICT DO NOTHING` turns a
//! duplicate insert into zero affected rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{Gateway, PaymentRecord};
use crate::domain::foundation::{DomainError, ErrorCode, PaymentId, SubscriptionId, Timestamp};
use crate::ports::{PaymentLedger, SaveResult};

use super::{corrupt_column, db_error};

pub struct PostgresPaymentLedger {
    pool: PgPool,
}

impl PostgresPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, subscription_id, amount_cents, gateway, gateway_payment_id, status, \
    period_start, period_end, paid_at, failure_reason, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    subscription_id: Uuid,
    amount_cents: i64,
    gateway: String,
    gateway_payment_id: Option<String>,
    status: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: PaymentId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            amount_cents: row.amount_cents,
            gateway: row.gateway.parse().map_err(|e| corrupt_column("gateway", e))?,
            gateway_payment_id: row.gateway_payment_id,
            status: row.status.parse().map_err(|e| corrupt_column("status", e))?,
            period_start: Timestamp::from_datetime(row.period_start),
            period_end: Timestamp::from_datetime(row.period_end),
            paid_at: row.paid_at.map(Timestamp::from_datetime),
            failure_reason: row.failure_reason,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[async_trait]
impl PaymentLedger for PostgresPaymentLedger {
    async fn insert_if_absent(&self, record: &PaymentRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_records (
                id, subscription_id, amount_cents, gateway, gateway_payment_id, status,
                period_start, period_end, paid_at, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (gateway, gateway_payment_id) WHERE gateway_payment_id IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.subscription_id.as_uuid())
        .bind(record.amount_cents)
        .bind(record.gateway.as_str())
        .bind(&record.gateway_payment_id)
        .bind(record.status.as_str())
        .bind(record.period_start.as_datetime())
        .bind(record.period_end.as_datetime())
        .bind(record.paid_at.as_ref().map(Timestamp::as_datetime))
        .bind(&record.failure_reason)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert payment record", e))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn update(&self, record: &PaymentRecord) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_records SET
                status = $2,
                period_start = $3,
                period_end = $4,
                paid_at = $5,
                failure_reason = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.status.as_str())
        .bind(record.period_start.as_datetime())
        .bind(record.period_end.as_datetime())
        .bind(record.paid_at.as_ref().map(Timestamp::as_datetime))
        .bind(&record.failure_reason)
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update payment record", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::PaymentNotFound,
                format!("Payment record {} not found", record.id),
            ));
        }
        Ok(())
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway: Gateway,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_records WHERE gateway = $1 AND gateway_payment_id = $2",
            COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find payment record", e))?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<PaymentRecord>, DomainError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_records WHERE subscription_id = $1 ORDER BY created_at",
            COLUMNS
        ))
        .bind(subscription_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list payment records", e))?;

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}
