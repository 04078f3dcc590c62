//! In-memory adapters.
//!
//! Used by tests and by the binary when no database is configured. State
//! lives in `tokio::sync` locks and is lost on restart.

mod payment_ledger;
mod subscription_event_publisher;
mod subscription_repository;
mod webhook_event_repository;

pub use payment_ledger::InMemoryPaymentLedger;
pub use subscription_event_publisher::RecordingEventPublisher;
pub use subscription_repository::InMemorySubscriptionRepository;
pub use webhook_event_repository::InMemoryWebhookEventRepository;
