//! Payment gateway adapters.
//!
//! - `http` - authenticated request executor shared by both gateways
//! - `pix` - PIX Automático recurrences
//! - `card` - card billing via hosted checkout

pub mod card;
mod http;
pub mod pix;

pub use card::{CardAdapter, CardSettings, CARD_SIGNATURE_HEADER};
pub use http::{build_http_client, ApiErrorBody, GatewayHttpClient, DEFAULT_HTTP_TIMEOUT};
pub use pix::{ApprovalError, PixAdapter, PIX_SIGNATURE_HEADER};
