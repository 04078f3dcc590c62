//! Subscription command handlers.

mod cancel_subscription;
mod create_trial;
mod reconcile_subscriptions;
mod start_recurring_billing;

pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use create_trial::{CreateTrialCommand, CreateTrialHandler, CreateTrialResult, MAX_TRIAL_DAYS};
pub use reconcile_subscriptions::{
    ReconcileOutcome, ReconcileReport, ReconcileSubscriptionsHandler,
    DEFAULT_RECONCILE_BATCH_SIZE,
};
pub use start_recurring_billing::{
    StartRecurringBillingCommand, StartRecurringBillingHandler, StartRecurringBillingResult,
};
