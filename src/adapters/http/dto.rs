//! Data Transfer Objects for the billing HTTP API.
//!
//! Request bodies deserialize straight into domain value types; responses
//! flatten the aggregate into what the academy backend needs to gate access.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::billing::{BillingInterval, Gateway, Subscription, SubscriptionStatus};
use crate::domain::foundation::Timestamp;
use crate::ports::{Charge, Payer};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a trial.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTrialRequest {
    pub owner_id: Uuid,
    pub plan_id: Uuid,
    pub interval: BillingInterval,
    pub trial_days: u32,
}

/// Request to open a gateway recurrence for a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct StartBillingRequest {
    pub gateway: Gateway,
    pub amount_cents: i64,
    pub description: String,
    pub payer: Payer,
    #[serde(default)]
    pub price_reference: Option<String>,
    #[serde(default)]
    pub end_date: Option<Timestamp>,
}

/// Request to cancel a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub at_period_end: bool,
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "requested_by_owner".to_string()
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription as seen by API callers.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub owner_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub has_access: bool,
    pub gateway: Gateway,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_recurrence_id: Option<String>,
    pub billing_interval: BillingInterval,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end_date: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<Timestamp>,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(s: &Subscription) -> Self {
        Self {
            id: s.id.to_string(),
            owner_id: s.owner_id.to_string(),
            plan_id: s.plan_id.to_string(),
            status: s.status,
            has_access: s.status.has_access(),
            gateway: s.gateway,
            gateway_recurrence_id: s.gateway_recurrence_id.clone(),
            billing_interval: s.billing_interval,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            trial_end_date: s.trial_end_date,
            cancel_at_period_end: s.cancel_at_period_end,
            canceled_at: s.canceled_at,
        }
    }
}

/// Response after opening a recurrence.
#[derive(Debug, Clone, Serialize)]
pub struct StartBillingResponse {
    pub subscription: SubscriptionResponse,
    /// Contains the QR code or checkout URL the payer must act on.
    pub charge: Charge,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelSubscriptionResponse {
    pub subscription: SubscriptionResponse,
    pub effective_at: Timestamp,
}

/// Acknowledgement returned for every accepted webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub status: &'static str,
}

impl WebhookAckResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Standard error response for API errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}
