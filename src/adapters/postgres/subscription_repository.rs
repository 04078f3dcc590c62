//! PostgreSQL implementation of SubscriptionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{Gateway, Subscription, SubscriptionStatus};
use crate::domain::foundation::{
    DomainError, ErrorCode, OwnerId, PlanId, SubscriptionId, Timestamp,
};
use crate::ports::SubscriptionRepository;

use super::{corrupt_column, db_error, is_unique_violation};

/// PostgreSQL implementation of the SubscriptionRepository port.
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, owner_id, plan_id, status, gateway, gateway_recurrence_id, \
    billing_interval, current_period_start, current_period_end, trial_end_date, \
    past_due_since, cancel_at_period_end, canceled_at, cancel_reason, created_at, updated_at";

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_id: Uuid,
    plan_id: Uuid,
    status: String,
    gateway: String,
    gateway_recurrence_id: Option<String>,
    billing_interval: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    trial_end_date: Option<DateTime<Utc>>,
    past_due_since: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    canceled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            plan_id: PlanId::from_uuid(row.plan_id),
            status: row.status.parse().map_err(|e| corrupt_column("status", e))?,
            gateway: row.gateway.parse().map_err(|e| corrupt_column("gateway", e))?,
            gateway_recurrence_id: row.gateway_recurrence_id,
            billing_interval: row
                .billing_interval
                .parse()
                .map_err(|e| corrupt_column("billing_interval", e))?,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            trial_end_date: row.trial_end_date.map(Timestamp::from_datetime),
            past_due_since: row.past_due_since.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            cancel_reason: row.cancel_reason,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, owner_id, plan_id, status, gateway, gateway_recurrence_id,
                billing_interval, current_period_start, current_period_end, trial_end_date,
                past_due_since, cancel_at_period_end, canceled_at, cancel_reason,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.owner_id.as_uuid())
        .bind(subscription.plan_id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(subscription.gateway.as_str())
        .bind(&subscription.gateway_recurrence_id)
        .bind(subscription.billing_interval.as_str())
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.trial_end_date.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.past_due_since.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at.as_ref().map(Timestamp::as_datetime))
        .bind(&subscription.cancel_reason)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return DomainError::new(
                    ErrorCode::Conflict,
                    format!("Subscription {} conflicts with an existing one", subscription.id),
                );
            }
            db_error("save subscription", e)
        })?;

        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                gateway = $3,
                gateway_recurrence_id = $4,
                current_period_start = $5,
                current_period_end = $6,
                trial_end_date = $7,
                past_due_since = $8,
                cancel_at_period_end = $9,
                canceled_at = $10,
                cancel_reason = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.status.as_str())
        .bind(subscription.gateway.as_str())
        .bind(&subscription.gateway_recurrence_id)
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.trial_end_date.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.past_due_since.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at.as_ref().map(Timestamp::as_datetime))
        .bind(&subscription.cancel_reason)
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return DomainError::new(
                    ErrorCode::RecurrenceAlreadyActive,
                    "Recurrence is attached to another subscription",
                );
            }
            db_error("update subscription", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            ));
        }

        Ok(())
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("SELECT {} FROM subscriptions WHERE id = $1", COLUMNS))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("find subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_recurrence_id(
        &self,
        gateway: Gateway,
        recurrence_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE gateway = $1 AND gateway_recurrence_id = $2",
            COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(recurrence_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find subscription by recurrence", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_live_by_owner(&self, owner_id: OwnerId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions \
             WHERE owner_id = $1 AND status NOT IN ('canceled', 'expired')",
            COLUMNS
        ))
        .bind(owner_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find live subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_due_for_reconciliation(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM subscriptions
            WHERE status NOT IN ('canceled', 'expired')
              AND (
                    (cancel_at_period_end AND current_period_end <= $1)
                 OR (status = 'trialing' AND trial_end_date < $1)
                 OR (status = 'active' AND current_period_end < $1)
                 OR status = 'past_due'
              )
            ORDER BY current_period_end
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list subscriptions due for reconciliation", e))?;

        Ok(ids.into_iter().map(|(id,)| SubscriptionId::from_uuid(id)).collect())
    }
}
