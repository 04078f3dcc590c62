//! Authenticated JSON requests against a gateway API.
//!
//! Every request carries a bearer token from the shared `CredentialCache`.
//! A 401 answer invalidates that token and the request is sent once more
//! with a fresh one; a second 401 is reported as `Authentication`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::adapters::credentials::CredentialCache;
use crate::domain::billing::Gateway;
use crate::ports::{AccessToken, GatewayError};

/// Default timeout for outbound gateway calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider error code for an already existing recurrence.
const DUPLICATE_RECURRENCE_CODE: &str = "recorrencia_duplicada";

/// Builds the reqwest client shared by gateway adapters.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

/// Error body returned by gateway APIs.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, alias = "nome")]
    pub code: Option<String>,
    #[serde(default, alias = "mensagem")]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl ApiErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn describe(&self, raw: &str) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) if raw.is_empty() => "no error body".to_string(),
            (None, None) => raw.to_string(),
        }
    }
}

/// Shared request executor for one gateway.
pub struct GatewayHttpClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialCache>,
    gateway: Gateway,
}

impl GatewayHttpClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        credentials: Arc<CredentialCache>,
        gateway: Gateway,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            gateway,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and decodes a JSON response body.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(method, path, body).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    /// Sends a request whose response body is not needed.
    pub async fn send_empty<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), GatewayError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.execute(method, path, body).await.map(|_| ())
    }

    async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let token = self.credentials.get_token(self.gateway).await?;
        let response = self.send_once(method.clone(), path, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(response).await;
        }

        tracing::info!(
            gateway = %self.gateway,
            path,
            "Gateway answered 401, refreshing token and retrying"
        );
        self.credentials.invalidate(self.gateway, &token).await;

        let token = self.credentials.get_token(self.gateway).await?;
        let retried = self.send_once(method, path, body, &token).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            let raw = retried.text().await.unwrap_or_default();
            tracing::error!(gateway = %self.gateway, path, "Gateway rejected refreshed token");
            return Err(GatewayError::Authentication(
                ApiErrorBody::parse(&raw).describe(&raw),
            ));
        }
        Self::check_status(retried).await
    }

    async fn send_once<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        token: &AccessToken,
    ) -> Result<Response, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.request(method, &url).bearer_auth(token.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn check_status(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let raw = response.text().await.unwrap_or_default();

        Err(map_error_status(status, &raw, retry_after))
    }
}

/// Classifies a non-success gateway response.
fn map_error_status(status: StatusCode, raw: &str, retry_after: Option<Duration>) -> GatewayError {
    let body = ApiErrorBody::parse(raw);
    let message = body.describe(raw);
    let code = status.as_u16();

    if body.code.as_deref() == Some(DUPLICATE_RECURRENCE_CODE) {
        return GatewayError::Conflict(message);
    }

    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Authentication(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        StatusCode::CONFLICT => GatewayError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited { retry_after },
        s if s.is_server_error() => GatewayError::Server {
            status: code,
            message,
        },
        _ => GatewayError::Validation {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{AccessToken, CredentialError, GatewayCredential, IssuedToken, TokenSource};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Issues "stale" first and "fresh" afterwards.
    struct RotatingTokenSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenSource for RotatingTokenSource {
        async fn fetch_token(&self, _: &GatewayCredential) -> Result<IssuedToken, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let value = if n == 0 { "stale" } else { "fresh" };
            Ok(IssuedToken {
                access_token: AccessToken::new(value),
                expires_in: Duration::from_secs(3600),
            })
        }
    }

    fn client_for(url: &str) -> (GatewayHttpClient, Arc<RotatingTokenSource>) {
        let source = Arc::new(RotatingTokenSource {
            calls: AtomicU32::new(0),
        });
        let cache = CredentialCache::new().with_credential(
            GatewayCredential::new(Gateway::Pix, "id", SecretString::new("secret".into())),
            source.clone(),
        );
        (
            GatewayHttpClient::new(Client::new(), url, Arc::new(cache), Gateway::Pix),
            source,
        )
    }

    #[derive(Debug, Deserialize)]
    struct Rec {
        #[serde(rename = "idRec")]
        id_rec: String,
    }

    // ══════════════════════════════════════════════════════════════
    // 401 handling
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unauthorized_refreshes_token_and_retries_once() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/v2/rec/RR1")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/v2/rec/RR1")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"idRec":"RR1"}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, source) = client_for(&server.url());
        let rec: Rec = client
            .send_json(Method::GET, "/v2/rec/RR1", None::<&()>)
            .await
            .unwrap();

        assert_eq!(rec.id_rec, "RR1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn parallel_rejections_of_one_token_fetch_a_single_replacement() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/rec/RR1")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/v2/rec/RR1")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"idRec":"RR1"}"#)
            .create_async()
            .await;

        let (client, source) = client_for(&server.url());
        // Both callers share the stale token before either sees a 401.
        client.credentials.get_token(Gateway::Pix).await.unwrap();
        let (a, b) = tokio::join!(
            client.send_json::<(), Rec>(Method::GET, "/v2/rec/RR1", None),
            client.send_json::<(), Rec>(Method::GET, "/v2/rec/RR1", None),
        );

        assert_eq!(a.unwrap().id_rec, "RR1");
        assert_eq!(b.unwrap().id_rec, "RR1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_unauthorized_is_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/rec/RR1")
            .with_status(401)
            .with_body(r#"{"nome":"invalid_token","mensagem":"Token expirado"}"#)
            .expect(2)
            .create_async()
            .await;

        let (client, _) = client_for(&server.url());
        let err = client
            .send_json::<(), Rec>(Method::GET, "/v2/rec/RR1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Authentication(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn success_does_not_touch_credentials_twice() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/v2/rec/RR1")
            .match_body(mockito::Matcher::Json(serde_json::json!({"status": "CANCELADA"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let (client, source) = client_for(&server.url());
        client
            .send_empty(
                Method::PATCH,
                "/v2/rec/RR1",
                Some(&serde_json::json!({"status": "CANCELADA"})),
            )
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/rec")
            .with_status(429)
            .with_header("retry-after", "12")
            .create_async()
            .await;

        let (client, _) = client_for(&server.url());
        let err = client
            .send_json::<_, Rec>(Method::POST, "/v2/rec", Some(&serde_json::json!({})))
            .await
            .unwrap_err();

        match err {
            GatewayError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Status classification
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn status_classification() {
        assert!(matches!(
            map_error_status(StatusCode::NOT_FOUND, "", None),
            GatewayError::NotFound(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::CONFLICT, "", None),
            GatewayError::Conflict(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::BAD_GATEWAY, "", None),
            GatewayError::Server { status: 502, .. }
        ));
        assert!(matches!(
            map_error_status(StatusCode::UNPROCESSABLE_ENTITY, "", None),
            GatewayError::Validation { status: 422, .. }
        ));
    }

    #[test]
    fn duplicate_recurrence_code_is_conflict_regardless_of_status() {
        let err = map_error_status(
            StatusCode::BAD_REQUEST,
            r#"{"nome":"recorrencia_duplicada","mensagem":"Contrato já possui recorrência"}"#,
            None,
        );
        match err {
            GatewayError::Conflict(message) => {
                assert_eq!(message, "recorrencia_duplicada: Contrato já possui recorrência")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn english_error_body_is_understood() {
        let err = map_error_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":"invalid_price","message":"No such price","status":400}"#,
            None,
        );
        assert!(
            matches!(err, GatewayError::Validation { status: 400, ref message } if message == "invalid_price: No such price")
        );
    }
}
