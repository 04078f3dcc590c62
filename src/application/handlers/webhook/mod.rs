//! Webhook handlers.
//!
//! - `WebhookIngestor` - verify, deduplicate and store inbound deliveries
//! - `EventProcessor` - apply one stored event to subscriptions and the ledger
//! - `RetrySweep` - re-drive stored events the ingest path did not finish

mod ingest_webhook;
mod process_event;
mod retry_sweep;

pub use ingest_webhook::{IngestWebhookCommand, IngestWebhookResult, WebhookIngestor};
pub use process_event::{EventProcessor, ProcessOutcome, DEFAULT_PROCESSING_STALE_AFTER_SECS};
pub use retry_sweep::{RetrySweep, RetrySweepReport, DEFAULT_SWEEP_BATCH_SIZE};
