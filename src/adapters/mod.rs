//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing core to external systems:
//! - `credentials` - OAuth2 token exchange and the shared token cache
//! - `gateway` - PIX and card gateway clients
//! - `http` - Axum routes for webhooks and the subscription API
//! - `postgres` - durable repositories
//! - `memory` - in-process repositories for tests and local runs
//! - `events` - lifecycle event publishers

pub mod credentials;
pub mod events;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod postgres;

pub use events::TracingEventPublisher;
