//! Webhook ingestion and processing errors.
//!
//! `WebhookError` covers everything that can go wrong before an event is
//! persisted and maps to an HTTP status. `ProcessingError` covers applying a
//! stored event and decides between backoff retry and permanent failure.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Errors that occur while accepting a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Route names a gateway that is not configured.
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),

    /// Signature header required but absent.
    #[error("Missing signature")]
    MissingSignature,

    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed timestamp is outside the acceptable window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Body exceeded the configured limit.
    #[error("Payload too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from webhook payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Event ledger write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Verifier could not be built from its secret.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WebhookError {
    /// True for authenticity failures. Nothing is persisted for these.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
        )
    }

    /// Maps the error to an HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange => StatusCode::UNAUTHORIZED,

            WebhookError::ParseError(_) | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,

            WebhookError::UnknownGateway(_) => StatusCode::NOT_FOUND,

            WebhookError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            WebhookError::Storage(_) | WebhookError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Storage(err.to_string())
    }
}

/// Errors raised while applying a stored event.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// No subscription matches the event's references. May be eventual
    /// consistency between checkout and webhook delivery.
    #[error("Subscription not found for {0}")]
    SubscriptionNotFound(String),

    /// A refund names a payment the ledger has not recorded yet. The payment
    /// notice may still be in flight.
    #[error("Payment {0} not in ledger")]
    PaymentNotFound(String),

    /// Stored payload cannot be decoded.
    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    /// The event asks for a transition the state machine forbids.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// A gateway call made while applying the event failed.
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ProcessingError {
    /// Transient errors are retried on the backoff schedule.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessingError::SubscriptionNotFound(_)
                | ProcessingError::PaymentNotFound(_)
                | ProcessingError::Gateway(_)
                | ProcessingError::Storage(_)
        )
    }
}

impl From<DomainError> for ProcessingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::InvalidStateTransition
            | ErrorCode::SubscriptionTerminal
            | ErrorCode::RecurrenceAlreadyActive
            | ErrorCode::Conflict
            | ErrorCode::ValidationFailed
            | ErrorCode::InvalidFormat => ProcessingError::InvalidTransition(err.to_string()),
            ErrorCode::SubscriptionNotFound => ProcessingError::SubscriptionNotFound(err.message),
            ErrorCode::GatewayError | ErrorCode::RateLimited => {
                ProcessingError::Gateway(err.to_string())
            }
            _ => ProcessingError::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_map_to_401() {
        for err in [
            WebhookError::MissingSignature,
            WebhookError::InvalidSignature,
            WebhookError::TimestampOutOfRange,
        ] {
            assert!(err.is_authentication_failure());
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn parse_failures_map_to_400() {
        assert_eq!(
            WebhookError::ParseError("expected value".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::MissingField("pix").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn oversize_and_unknown_gateway_statuses() {
        assert_eq!(
            WebhookError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            WebhookError::UnknownGateway("boleto".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn missing_subscription_or_payment_is_transient() {
        assert!(ProcessingError::SubscriptionNotFound("rec-1".into()).is_transient());
        assert!(ProcessingError::PaymentNotFound("E2E1".into()).is_transient());
        assert!(ProcessingError::Storage("pool closed".into()).is_transient());
    }

    #[test]
    fn illegal_transition_is_permanent() {
        let err: ProcessingError =
            DomainError::new(ErrorCode::InvalidStateTransition, "canceled to active").into();
        assert!(!err.is_transient());
        assert!(!ProcessingError::MalformedPayload("eof".into()).is_transient());
    }

    #[test]
    fn database_errors_become_transient_storage_errors() {
        let err: ProcessingError = DomainError::database("connection reset").into();
        assert!(matches!(err, ProcessingError::Storage(_)));
        assert!(err.is_transient());
    }
}
