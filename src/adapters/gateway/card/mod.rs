//! Card billing gateway (hosted checkout plus invoice webhooks).

mod adapter;
mod wire;

pub use adapter::{CardAdapter, CardSettings, CARD_SIGNATURE_HEADER};
