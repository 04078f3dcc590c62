//! Billing domain - subscriptions, payments and gateway events.
//!
//! # Module Organization
//!
//! - `status` / `subscription` - subscription state machine and aggregate
//! - `payment` - payment ledger records
//! - `gateway_event` - gateway-neutral webhook events
//! - `webhook_event` - stored webhook events with retry schedule
//! - `signature` - webhook signature verification
//! - `errors` - ingestion and processing errors

mod errors;
mod events;
mod gateway;
mod gateway_event;
mod payment;
mod plan;
mod signature;
mod status;
mod subscription;
mod webhook_event;

pub use errors::{ProcessingError, WebhookError};
pub use events::{SubscriptionEvent, SubscriptionEventKind};
pub use gateway::Gateway;
pub use gateway_event::{BillingEventKind, ConfirmedPayment, NormalizedEvent, SubscriptionLookup};
pub use payment::{PaymentRecord, PaymentStatus};
pub use plan::BillingInterval;
pub use signature::{
    HmacSignatureVerifier, SignatureHeader, TimestampedSignatureVerifier,
    DEFAULT_SIGNATURE_TOLERANCE_SECS,
};
pub use status::SubscriptionStatus;
pub use subscription::{
    CoveredPeriod, ReconciliationAction, RecurrenceRef, Subscription, DEFAULT_GRACE_PERIOD_DAYS,
};
pub use webhook_event::{backoff_delay, FailureDisposition, WebhookEvent, WebhookStatus, MAX_RETRIES};
