//! PaymentGateway port - gateway-neutral contract for PIX and card billing.
//!
//! Adapters translate `ChargeRequest` into provider calls and provider
//! webhooks into `NormalizedEvent`s. Authenticated calls go through the
//! credential cache; a 401 invalidates the cached token and the request is
//! retried once before surfacing `GatewayError::Authentication`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::billing::{BillingInterval, Gateway, NormalizedEvent, WebhookError};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};

use super::CredentialError;

/// The person or company authorizing the recurring charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub name: String,
    /// CPF (11 digits) or CNPJ (14 digits). Required for PIX.
    pub tax_id: Option<String>,
    pub email: Option<String>,
}

/// Request to set up recurring billing for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Sent to the gateway as contract / metadata so webhooks can find us.
    pub subscription_id: SubscriptionId,
    pub amount_cents: i64,
    pub interval: BillingInterval,
    pub description: String,
    pub payer: Payer,
    /// Catalog price id. Required for card.
    pub price_reference: Option<String>,
    pub start_date: Timestamp,
    pub end_date: Option<Timestamp>,
}

/// Gateway-neutral state of a charge or recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Waiting for the payer to approve (QR code / checkout not completed).
    AwaitingAuthorization,
    Active,
    Rejected,
    Canceled,
    Expired,
}

impl ChargeStatus {
    /// True once the status can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ChargeStatus::Rejected | ChargeStatus::Canceled | ChargeStatus::Expired
        )
    }
}

/// What the payer needs in order to authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizationArtifact {
    PixQrCode {
        copy_paste: String,
        location: Option<String>,
    },
    CheckoutUrl {
        url: String,
    },
    None,
}

/// Result of creating a recurring charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: String,
    /// Gateway recurrence id, once the gateway has assigned one.
    pub recurrence_id: Option<String>,
    pub status: ChargeStatus,
    pub authorization: AuthorizationArtifact,
}

/// Outbound gateway error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Credentials rejected, including a second 401 after refresh.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request rejected as malformed (4xx other than 401/404/409/429).
    #[error("Validation failed (HTTP {status}): {message}")]
    Validation { status: u16, message: String },

    /// Resource unknown to the gateway.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate resource, e.g. recurrence already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Gateway server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// True if the caller may retry under its own backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::Server { .. } | GatewayError::Transport(_)
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            status: 400,
            message: message.into(),
        }
    }
}

impl From<CredentialError> for GatewayError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Transport(message) => GatewayError::Transport(message),
            CredentialError::Unavailable { status, message } => {
                GatewayError::Server { status, message }
            }
            CredentialError::InvalidResponse(message) => GatewayError::InvalidResponse(message),
            other => GatewayError::Authentication(other.to_string()),
        }
    }
}

impl From<GatewayError> for DomainError {
    fn from(err: GatewayError) -> Self {
        let code = match &err {
            GatewayError::Validation { .. } => ErrorCode::ValidationFailed,
            GatewayError::Conflict(_) => ErrorCode::Conflict,
            GatewayError::RateLimited { .. } => ErrorCode::RateLimited,
            _ => ErrorCode::GatewayError,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Port for a payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which gateway this adapter speaks to.
    fn gateway(&self) -> Gateway;

    /// Validates the request, creates the recurrence / checkout and returns
    /// the artifact the payer must act on.
    async fn create_recurring_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError>;

    async fn get_charge_status(&self, charge_id: &str) -> Result<ChargeStatus, GatewayError>;

    async fn cancel_recurrence(&self, recurrence_id: &str) -> Result<(), GatewayError>;

    /// Payments the gateway collected on a recurrence, as the events their
    /// webhooks would have produced (same event ids).
    ///
    /// Gateways that cannot list them report none.
    async fn recurrence_payments(
        &self,
        _recurrence_id: &str,
    ) -> Result<Vec<NormalizedEvent>, GatewayError> {
        Ok(Vec::new())
    }

    /// Header that carries the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Checks webhook authenticity.
    ///
    /// # Errors
    ///
    /// `MissingSignature` when a signature is required and absent,
    /// `InvalidSignature` or `TimestampOutOfRange` when it does not verify.
    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: Timestamp,
    ) -> Result<(), WebhookError>;

    /// Converts a provider payload into one or more normalized events.
    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError>;
}
