//! Application layer - command handlers and background sweeps.
//!
//! Handlers orchestrate domain operations and coordinate between ports.
//! Mutations of one subscription are serialized through `SubscriptionLocks`.

mod gateway_registry;
pub mod handlers;
pub mod locks;
pub mod sweeper;

#[cfg(test)]
pub mod test_support;

pub use gateway_registry::GatewayRegistry;
pub use handlers::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    CreateTrialCommand, CreateTrialHandler, CreateTrialResult, EventProcessor,
    IngestWebhookCommand, IngestWebhookResult, ProcessOutcome, ReconcileOutcome, ReconcileReport,
    ReconcileSubscriptionsHandler, RetrySweep, RetrySweepReport, StartRecurringBillingCommand,
    StartRecurringBillingHandler, StartRecurringBillingResult, WebhookIngestor,
};
pub use locks::SubscriptionLocks;
pub use sweeper::{BillingSweeper, BillingSweeperConfig, SweepReport};
