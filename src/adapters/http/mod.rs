//! HTTP adapter - REST API for the billing service.
//!
//! - `GET /health` - Liveness check
//! - `POST /webhooks/:gateway` - Gateway webhook deliveries (signature verified)
//! - `POST /subscriptions/trials` - Start a trial
//! - `GET /subscriptions/:id` - Read a subscription
//! - `POST /subscriptions/:id/billing` - Open the gateway recurrence
//! - `POST /subscriptions/:id/cancel` - Cancel a subscription

pub mod dto;
mod handlers;
mod routes;

pub use handlers::{BillingApiError, BillingAppState};
pub use routes::{app, billing_router, subscription_routes, webhook_routes};
