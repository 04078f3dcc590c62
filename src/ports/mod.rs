//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Gateway Ports
//!
//! - `TokenSource` - OAuth2 client-credentials exchange
//! - `PaymentGateway` - outbound charges and webhook parsing per gateway
//!
//! ## Storage Ports
//!
//! - `WebhookEventRepository` - durable webhook event ledger
//! - `SubscriptionRepository` - subscription aggregates
//! - `PaymentLedger` - payment attempts keyed by gateway payment id
//!
//! ## Notification Ports
//!
//! - `SubscriptionEventPublisher` - lifecycle events

mod payment_gateway;
mod payment_ledger;
mod subscription_event_publisher;
mod subscription_repository;
mod token_source;
mod webhook_event_repository;

pub use payment_gateway::{
    AuthorizationArtifact, Charge, ChargeRequest, ChargeStatus, GatewayError, Payer,
    PaymentGateway,
};
pub use payment_ledger::PaymentLedger;
pub use subscription_event_publisher::SubscriptionEventPublisher;
pub use subscription_repository::SubscriptionRepository;
pub use token_source::{AccessToken, CredentialError, GatewayCredential, IssuedToken, TokenSource};
pub use webhook_event_repository::{ClaimPolicy, SaveResult, WebhookEventRepository};
