//! Subscription lifecycle publishers.
//!
//! - `TracingEventPublisher` - structured log records on the
//!   `subscription_events` target

mod tracing_publisher;

pub use tracing_publisher::TracingEventPublisher;
