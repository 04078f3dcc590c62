//! OAuth2 client-credentials token endpoint client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;

use crate::ports::{AccessToken, CredentialError, GatewayCredential, IssuedToken, TokenSource};

/// Lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorBody {
    #[serde(default, alias = "error_description", alias = "mensagem")]
    message: Option<String>,
    #[serde(default, alias = "nome")]
    error: Option<String>,
}

/// Exchanges client credentials at `{base_url}/oauth/token`.
///
/// The credentials travel as HTTP Basic auth and the body is the form
/// `grant_type=client_credentials`.
pub struct OAuthTokenClient {
    client: Client,
    token_url: String,
}

impl OAuthTokenClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            token_url: format!("{}/oauth/token", base_url.trim_end_matches('/')),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    fn error_message(status: u16, body: &str) -> String {
        let parsed: TokenErrorBody = serde_json::from_str(body).unwrap_or_default();
        parsed
            .message
            .or(parsed.error)
            .unwrap_or_else(|| format!("status {}", status))
    }
}

#[async_trait]
impl TokenSource for OAuthTokenClient {
    async fn fetch_token(&self, credential: &GatewayCredential) -> Result<IssuedToken, CredentialError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(
                &credential.client_id,
                Some(credential.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = Self::error_message(status.as_u16(), &body);
            tracing::warn!(
                gateway = %credential.gateway,
                status = status.as_u16(),
                "Token request rejected"
            );
            return Err(if status.is_server_error() {
                CredentialError::Unavailable {
                    status: status.as_u16(),
                    message,
                }
            } else {
                CredentialError::Rejected {
                    gateway: credential.gateway,
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(CredentialError::InvalidResponse("empty access_token".to_string()));
        }

        Ok(IssuedToken {
            access_token: AccessToken::new(token.access_token),
            expires_in: Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::Gateway;
    use secrecy::SecretString;

    fn credential() -> GatewayCredential {
        GatewayCredential::new(Gateway::Pix, "Client_Id", SecretString::new("Client_Secret".into()))
    }

    // base64("Client_Id:Client_Secret")
    const BASIC: &str = "Basic Q2xpZW50X0lkOkNsaWVudF9TZWNyZXQ=";

    #[test]
    fn token_url_strips_trailing_slash() {
        let client = OAuthTokenClient::new(Client::new(), "https://pix-h.api.efipay.com.br/");
        assert_eq!(client.token_url(), "https://pix-h.api.efipay.com.br/oauth/token");
    }

    #[tokio::test]
    async fn exchanges_credentials_for_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("authorization", BASIC)
            .match_body("grant_type=client_credentials")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"abc123","token_type":"Bearer","expires_in":3600,"scope":"rec.write"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = OAuthTokenClient::new(Client::new(), &server.url());
        let token = client.fetch_token(&credential()).await.unwrap();

        assert_eq!(token.access_token.expose(), "abc123");
        assert_eq!(token.expires_in, Duration::from_secs(3600));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_rejection_with_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body(r#"{"nome":"invalid_client","mensagem":"Credenciais inválidas"}"#)
            .create_async()
            .await;

        let client = OAuthTokenClient::new(Client::new(), &server.url());
        let err = client.fetch_token(&credential()).await.unwrap_err();

        match err {
            CredentialError::Rejected { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Credenciais inválidas");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let client = OAuthTokenClient::new(Client::new(), &server.url());
        let err = client.fetch_token(&credential()).await.unwrap_err();

        assert!(matches!(err, CredentialError::Unavailable { status: 503, .. }));
    }

    #[tokio::test]
    async fn non_token_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let client = OAuthTokenClient::new(Client::new(), &server.url());
        let err = client.fetch_token(&credential()).await.unwrap_err();

        assert!(matches!(err, CredentialError::InvalidResponse(_)));
    }
}
