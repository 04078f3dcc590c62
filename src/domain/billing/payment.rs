//! Payment ledger records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{
    DomainError, ErrorCode, PaymentId, StateMachine, SubscriptionId, Timestamp, ValidationError,
};

use super::{CoveredPeriod, Gateway};

/// Status of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    /// Claimed by the event processor, subscription update in flight.
    Processing,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// True once the payment's effect on the subscription has been settled.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Succeeded)
                | (Pending, Failed)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Succeeded, Refunded)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Pending => vec![Processing, Succeeded, Failed],
            Processing => vec![Succeeded, Failed],
            Succeeded => vec![Refunded],
            Failed | Refunded => vec![],
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ValidationError::invalid_format(
                "payment_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// One payment attempt against a subscription.
///
/// `gateway_payment_id` is unique when present; it is the idempotency key
/// for confirmed-payment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub subscription_id: SubscriptionId,
    pub amount_cents: i64,
    pub gateway: Gateway,
    pub gateway_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub paid_at: Option<Timestamp>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PaymentRecord {
    /// Opens a record for a confirmed payment whose subscription update has
    /// not been applied yet.
    pub fn processing(
        subscription_id: SubscriptionId,
        gateway: Gateway,
        gateway_payment_id: impl Into<String>,
        amount_cents: i64,
        period: CoveredPeriod,
        now: Timestamp,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            subscription_id,
            amount_cents,
            gateway,
            gateway_payment_id: Some(gateway_payment_id.into()),
            status: PaymentStatus::Processing,
            period_start: period.start,
            period_end: period.end,
            paid_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a failed attempt.
    pub fn failed(
        subscription_id: SubscriptionId,
        gateway: Gateway,
        gateway_payment_id: Option<String>,
        amount_cents: i64,
        period: CoveredPeriod,
        reason: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            subscription_id,
            amount_cents,
            gateway,
            gateway_payment_id,
            status: PaymentStatus::Failed,
            period_start: period.start,
            period_end: period.end,
            paid_at: None,
            failure_reason: reason,
            created_at: now,
            updated_at: now,
        }
    }

    /// The period this payment pays for.
    pub fn covered_period(&self) -> CoveredPeriod {
        CoveredPeriod {
            start: self.period_start,
            end: self.period_end,
        }
    }

    pub fn succeed(&mut self, paid_at: Timestamp, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(PaymentStatus::Succeeded)?;
        self.paid_at = Some(paid_at);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: Option<String>, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(PaymentStatus::Failed)?;
        self.failure_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    pub fn refund(&mut self, now: Timestamp) -> Result<(), DomainError> {
        self.transition_to(PaymentStatus::Refunded)?;
        self.updated_at = now;
        Ok(())
    }

    fn transition_to(&mut self, target: PaymentStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot transition payment from {} to {}", self.status, target),
            )
            .with_detail("payment_id", self.id.to_string())
        })?;
        Ok(())
    }
}
