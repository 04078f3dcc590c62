//! TokenSource port - OAuth2 client-credentials token acquisition.
//!
//! The credential cache owns caching and refresh policy; a `TokenSource` only
//! performs the network exchange. Keeping the exchange behind a trait lets the
//! cache be exercised without a token endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::billing::Gateway;

/// Client credentials for one gateway.
#[derive(Clone)]
pub struct GatewayCredential {
    pub gateway: Gateway,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl GatewayCredential {
    pub fn new(gateway: Gateway, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            gateway,
            client_id: client_id.into(),
            client_secret,
        }
    }
}

impl fmt::Debug for GatewayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredential")
            .field("gateway", &self.gateway)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// A bearer token handed to callers. The value is never logged.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Token returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: AccessToken,
    /// Lifetime reported by the provider.
    pub expires_in: Duration,
}

/// Errors from obtaining a token.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Token endpoint rejected the client credentials.
    #[error("Credentials rejected by {gateway} (HTTP {status}): {message}")]
    Rejected {
        gateway: Gateway,
        status: u16,
        message: String,
    },

    /// Token endpoint answered with a server error.
    #[error("Token endpoint unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Network failure reaching the token endpoint.
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    /// Token endpoint answered with something other than a token.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// No credential registered for the gateway.
    #[error("No credentials configured for gateway {0}")]
    NotConfigured(Gateway),
}

/// Port for exchanging client credentials for an access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Performs one token request. Never cached, never retried.
    async fn fetch_token(&self, credential: &GatewayCredential) -> Result<IssuedToken, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn TokenSource) {}

    #[test]
    fn debug_output_redacts_secrets() {
        let credential = GatewayCredential::new(
            Gateway::Pix,
            "Client_Id_abc",
            SecretString::new("Client_Secret_xyz".into()),
        );
        let token = AccessToken::new("eyJhbGciOi");

        let rendered = format!("{:?} {:?}", credential, token);
        assert!(rendered.contains("Client_Id_abc"));
        assert!(!rendered.contains("Client_Secret_xyz"));
        assert!(!rendered.contains("eyJhbGciOi"));
    }
}
