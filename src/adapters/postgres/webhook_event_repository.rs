//! PostgreSQL implementation of WebhookEventRepository.
//!
//! `UNIQUE (gateway, event_id)` collapses duplicate deliveries, including
//! concurrent ones. Claims lock the row with `FOR UPDATE SKIP LOCKED` so two
//! workers never process the same event at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{Gateway, WebhookEvent, WebhookStatus};
use crate::domain::foundation::{DomainError, Timestamp, WebhookEventId};
use crate::ports::{ClaimPolicy, SaveResult, WebhookEventRepository};

use super::{corrupt_column, db_error};

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, gateway, event_id, event_type, payload, headers, status, retry_count, \
    next_retry_at, last_error, received_at, processing_started_at, processed_at, archived_at";

/// Matches `WebhookEvent::is_claimable`. Binds: $1 now, $2 pending cutoff, $3 stale cutoff.
const CLAIMABLE: &str = "(status = 'pending' AND received_at <= $2) \
    OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= $1) \
    OR (status = 'processing' AND (processing_started_at IS NULL OR processing_started_at <= $3))";

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    gateway: String,
    event_id: String,
    event_type: String,
    payload: serde_json::Value,
    headers: serde_json::Value,
    status: String,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    received_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEvent {
            id: WebhookEventId::from_uuid(row.id),
            gateway: row.gateway.parse().map_err(|e| corrupt_column("gateway", e))?,
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            headers: row.headers,
            status: row.status.parse().map_err(|e| corrupt_column("status", e))?,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|e| corrupt_column("retry_count", e))?,
            next_retry_at: row.next_retry_at.map(Timestamp::from_datetime),
            last_error: row.last_error,
            received_at: Timestamp::from_datetime(row.received_at),
            processing_started_at: row.processing_started_at.map(Timestamp::from_datetime),
            processed_at: row.processed_at.map(Timestamp::from_datetime),
            archived_at: row.archived_at.map(Timestamp::from_datetime),
        })
    }
}

/// Cutoffs for the claimable predicate at `now`.
fn cutoffs(now: Timestamp, policy: ClaimPolicy) -> (Timestamp, Timestamp) {
    (now.plus(-policy.pending_grace), now.plus(-policy.stale_after))
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, gateway, event_id, event_type, payload, headers, status, retry_count,
                next_retry_at, last_error, received_at, processing_started_at, processed_at,
                archived_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (gateway, event_id) DO NOTHING
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.gateway.as_str())
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.headers)
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(event.next_retry_at.as_ref().map(Timestamp::as_datetime))
        .bind(&event.last_error)
        .bind(event.received_at.as_datetime())
        .bind(event.processing_started_at.as_ref().map(Timestamp::as_datetime))
        .bind(event.processed_at.as_ref().map(Timestamp::as_datetime))
        .bind(event.archived_at.as_ref().map(Timestamp::as_datetime))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert webhook event", e))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn find_by_id(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>, DomainError> {
        let row: Option<WebhookEventRow> =
            sqlx::query_as(&format!("SELECT {} FROM webhook_events WHERE id = $1", COLUMNS))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("find webhook event", e))?;

        row.map(WebhookEvent::try_from).transpose()
    }

    async fn find_by_event_id(
        &self,
        gateway: Gateway,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM webhook_events WHERE gateway = $1 AND event_id = $2",
            COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find webhook event", e))?;

        row.map(WebhookEvent::try_from).transpose()
    }

    async fn claim(
        &self,
        id: WebhookEventId,
        now: Timestamp,
        policy: ClaimPolicy,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        let (pending_cutoff, stale_cutoff) = cutoffs(now, policy);
        let row: Option<WebhookEventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE webhook_events SET status = 'processing', processing_started_at = $1
            WHERE id = (
                SELECT id FROM webhook_events
                WHERE id = $4 AND ({claimable})
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {columns}
            "#,
            claimable = CLAIMABLE,
            columns = COLUMNS,
        ))
        .bind(now.as_datetime())
        .bind(pending_cutoff.as_datetime())
        .bind(stale_cutoff.as_datetime())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("claim webhook event", e))?;

        row.map(WebhookEvent::try_from).transpose()
    }

    async fn complete(&self, event: &WebhookEvent, claimed_at: Timestamp) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                status = $2,
                retry_count = $3,
                next_retry_at = $4,
                last_error = $5,
                processing_started_at = $6,
                processed_at = $7,
                archived_at = $8
            WHERE id = $1 AND status = 'processing' AND processing_started_at = $9
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.status.as_str())
        .bind(event.retry_count as i32)
        .bind(event.next_retry_at.as_ref().map(Timestamp::as_datetime))
        .bind(&event.last_error)
        .bind(event.processing_started_at.as_ref().map(Timestamp::as_datetime))
        .bind(event.processed_at.as_ref().map(Timestamp::as_datetime))
        .bind(event.archived_at.as_ref().map(Timestamp::as_datetime))
        .bind(claimed_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("complete webhook event", e))?;

        // Zero rows: a newer claim owns the event
        Ok(result.rows_affected() > 0)
    }

    async fn find_claimable(
        &self,
        now: Timestamp,
        policy: ClaimPolicy,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, DomainError> {
        let (pending_cutoff, stale_cutoff) = cutoffs(now, policy);
        let ids: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT id FROM webhook_events WHERE {} ORDER BY received_at LIMIT $4",
            CLAIMABLE
        ))
        .bind(now.as_datetime())
        .bind(pending_cutoff.as_datetime())
        .bind(stale_cutoff.as_datetime())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list claimable webhook events", e))?;

        Ok(ids.into_iter().map(|(id,)| WebhookEventId::from_uuid(id)).collect())
    }

    async fn list_by_status(
        &self,
        status: WebhookStatus,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, DomainError> {
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM webhook_events WHERE status = $1 ORDER BY received_at LIMIT $2",
            COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list webhook events", e))?;

        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn archive_settled_before(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET archived_at = $2
            WHERE status IN ('processed', 'skipped')
              AND archived_at IS NULL
              AND received_at < $1
            "#,
        )
        .bind(cutoff.as_datetime())
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("archive webhook events", e))?;

        Ok(result.rows_affected())
    }
}
