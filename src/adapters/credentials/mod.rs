//! Gateway credentials - OAuth2 token acquisition and caching.
//!
//! - `OAuthTokenClient` - client-credentials exchange over HTTP
//! - `CredentialCache` - per-gateway token cache with single-flight refresh

mod credential_cache;
mod oauth_client;

pub use credential_cache::{CredentialCache, DEFAULT_REFRESH_LEAD};
pub use oauth_client::OAuthTokenClient;
