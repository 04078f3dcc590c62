//! Academy Billing - payment-gateway synchronization for academy subscriptions
//!
//! Keeps academy subscriptions in step with two payment rails: PIX Automático
//! recurrences and card billing through a hosted checkout. Gateway webhooks
//! are verified, stored once and applied to the subscription state machine
//! and the payment ledger; a background sweeper retries what failed and
//! moves subscriptions through trial expiry, grace periods and deferred
//! cancellation.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
