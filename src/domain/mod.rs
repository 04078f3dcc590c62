//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `billing` - Subscription lifecycle, payment ledger and webhook events

pub mod billing;
pub mod foundation;
