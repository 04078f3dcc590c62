//! Credential cache - shared OAuth2 bearer tokens per gateway.
//!
//! One slot per gateway. Readers share a read lock and return the cached
//! token while it has more than `refresh_lead` left. A miss takes the write
//! lock and checks again before calling the token endpoint, so any number of
//! concurrent misses produce exactly one token request.
//!
//! The only mutations are the refresh inside `get_token` and `invalidate`.
//! A failed refresh returns the error and leaves the slot untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::domain::billing::Gateway;
use crate::ports::{AccessToken, CredentialError, GatewayCredential, TokenSource};

/// Default margin before expiry at which a token stops being handed out.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

struct CredentialSlot {
    credential: GatewayCredential,
    source: Arc<dyn TokenSource>,
    state: RwLock<Option<CachedToken>>,
}

/// Thread-safe token cache shared by every outbound gateway call.
pub struct CredentialCache {
    slots: HashMap<Gateway, CredentialSlot>,
    refresh_lead: Duration,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            refresh_lead: DEFAULT_REFRESH_LEAD,
        }
    }

    pub fn with_refresh_lead(mut self, refresh_lead: Duration) -> Self {
        self.refresh_lead = refresh_lead;
        self
    }

    /// Registers the credential and token endpoint for a gateway.
    pub fn with_credential(mut self, credential: GatewayCredential, source: Arc<dyn TokenSource>) -> Self {
        self.slots.insert(
            credential.gateway,
            CredentialSlot {
                credential,
                source,
                state: RwLock::new(None),
            },
        );
        self
    }

    pub fn has_gateway(&self, gateway: Gateway) -> bool {
        self.slots.contains_key(&gateway)
    }

    /// Returns a token with more than `refresh_lead` of validity left,
    /// refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// Token endpoint errors are returned as-is; nothing is retried here.
    pub async fn get_token(&self, gateway: Gateway) -> Result<AccessToken, CredentialError> {
        let slot = self.slot(gateway)?;

        {
            let state = slot.state.read().await;
            if let Some(token) = self.usable(state.as_ref()) {
                return Ok(token);
            }
        }

        let mut state = slot.state.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.usable(state.as_ref()) {
            return Ok(token);
        }

        let issued = slot.source.fetch_token(&slot.credential).await.map_err(|e| {
            tracing::warn!(gateway = %gateway, error = %e, "Token refresh failed");
            e
        })?;

        tracing::debug!(
            gateway = %gateway,
            expires_in_secs = issued.expires_in.as_secs(),
            "Access token refreshed"
        );

        *state = Some(CachedToken {
            token: issued.access_token.clone(),
            expires_at: Instant::now() + issued.expires_in,
        });
        Ok(issued.access_token)
    }

    /// Drops the cached token so the next `get_token` hits the network.
    ///
    /// Called with the token a gateway just answered 401 to. The slot is
    /// cleared only while it still holds that token; a newer token fetched by
    /// another caller after the same rejection is kept.
    pub async fn invalidate(&self, gateway: Gateway, rejected: &AccessToken) {
        let Some(slot) = self.slots.get(&gateway) else {
            return;
        };
        let mut state = slot.state.write().await;
        match state.as_ref() {
            Some(cached) if cached.token.expose() == rejected.expose() => {
                *state = None;
                tracing::info!(gateway = %gateway, "Access token invalidated");
            }
            _ => tracing::debug!(gateway = %gateway, "Rejected token already replaced"),
        }
    }

    fn slot(&self, gateway: Gateway) -> Result<&CredentialSlot, CredentialError> {
        self.slots
            .get(&gateway)
            .ok_or(CredentialError::NotConfigured(gateway))
    }

    fn usable(&self, cached: Option<&CachedToken>) -> Option<AccessToken> {
        cached
            .filter(|c| Instant::now() + self.refresh_lead < c.expires_at)
            .map(|c| c.token.clone())
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::IssuedToken;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Token source that counts requests and issues `token-<n>`.
    struct CountingTokenSource {
        calls: AtomicU32,
        expires_in: Duration,
        delay: Duration,
        failures: Mutex<Vec<CredentialError>>,
    }

    impl CountingTokenSource {
        fn new(expires_in: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                expires_in,
                delay: Duration::from_millis(20),
                failures: Mutex::new(Vec::new()),
            }
        }

        fn failing_next_with(self, error: CredentialError) -> Self {
            self.failures.lock().unwrap().push(error);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for CountingTokenSource {
        async fn fetch_token(&self, _credential: &GatewayCredential) -> Result<IssuedToken, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if let Some(error) = self.failures.lock().unwrap().pop() {
                return Err(error);
            }
            Ok(IssuedToken {
                access_token: AccessToken::new(format!("token-{}", n)),
                expires_in: self.expires_in,
            })
        }
    }

    fn credential() -> GatewayCredential {
        GatewayCredential::new(Gateway::Pix, "client", SecretString::new("secret".into()))
    }

    fn cache_with(source: Arc<CountingTokenSource>) -> Arc<CredentialCache> {
        Arc::new(CredentialCache::new().with_credential(credential(), source))
    }

    // ══════════════════════════════════════════════════════════════
    // Refresh collapsing
    // ══════════════════════════════════════════════════════════════

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_make_exactly_one_token_request() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = cache_with(source.clone());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token(Gateway::Pix).await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.expose(), "token-1");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_near_expiry_refresh_once() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = Arc::new(
            CredentialCache::new()
                .with_refresh_lead(Duration::from_secs(60))
                .with_credential(credential(), source.clone()),
        );

        // Seed a token that is inside the refresh lead
        {
            let slot = cache.slot(Gateway::Pix).unwrap();
            *slot.state.write().await = Some(CachedToken {
                token: AccessToken::new("almost-expired"),
                expires_at: Instant::now() + Duration::from_secs(30),
            });
        }

        let tokens = futures::future::join_all((0..16).map(|_| {
            let cache = cache.clone();
            async move { cache.get_token(Gateway::Pix).await.unwrap() }
        }))
        .await;

        assert!(tokens.iter().all(|t| t.expose() == "token-1"));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_network() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = cache_with(source.clone());

        cache.get_token(Gateway::Pix).await.unwrap();
        cache.get_token(Gateway::Pix).await.unwrap();

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn token_shorter_than_lead_is_never_reused() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(30)));
        let cache = cache_with(source.clone());

        let first = cache.get_token(Gateway::Pix).await.unwrap();
        let second = cache.get_token(Gateway::Pix).await.unwrap();

        assert_eq!(first.expose(), "token-1");
        assert_eq!(second.expose(), "token-2");
    }

    // ══════════════════════════════════════════════════════════════
    // Invalidation and failures
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn invalidate_forces_a_fresh_request() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = cache_with(source.clone());

        let stale = cache.get_token(Gateway::Pix).await.unwrap();
        cache.invalidate(Gateway::Pix, &stale).await;
        let fresh = cache.get_token(Gateway::Pix).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_ne!(stale.expose(), fresh.expose());
    }

    #[tokio::test]
    async fn second_rejection_of_the_same_token_keeps_the_refreshed_one() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = cache_with(source.clone());
        let stale = cache.get_token(Gateway::Pix).await.unwrap();

        // Two callers were both answered 401 for `stale`
        cache.invalidate(Gateway::Pix, &stale).await;
        let first = cache.get_token(Gateway::Pix).await.unwrap();
        cache.invalidate(Gateway::Pix, &stale).await;
        let second = cache.get_token(Gateway::Pix).await.unwrap();

        assert_eq!(first.expose(), "token-2");
        assert_eq!(second.expose(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rejections_refresh_once() {
        let source = Arc::new(CountingTokenSource::new(Duration::from_secs(3600)));
        let cache = cache_with(source.clone());
        let stale = cache.get_token(Gateway::Pix).await.unwrap();

        let tokens = futures::future::join_all((0..8).map(|_| {
            let cache = cache.clone();
            let stale = stale.clone();
            async move {
                cache.invalidate(Gateway::Pix, &stale).await;
                cache.get_token(Gateway::Pix).await.unwrap()
            }
        }))
        .await;

        assert!(tokens.iter().all(|t| t.expose() == "token-2"));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_previous_entry_intact() {
        let source = Arc::new(
            CountingTokenSource::new(Duration::from_secs(3600))
                .failing_next_with(CredentialError::Transport("connection refused".into())),
        );
        let cache = cache_with(source.clone());

        let slot = cache.slot(Gateway::Pix).unwrap();
        *slot.state.write().await = Some(CachedToken {
            token: AccessToken::new("previous"),
            expires_at: Instant::now() + Duration::from_secs(45),
        });

        let err = cache.get_token(Gateway::Pix).await.unwrap_err();
        assert!(matches!(err, CredentialError::Transport(_)));

        let state = slot.state.read().await;
        assert_eq!(state.as_ref().unwrap().token.expose(), "previous");
    }

    #[tokio::test]
    async fn rejected_credentials_surface_as_typed_error() {
        let source = Arc::new(
            CountingTokenSource::new(Duration::from_secs(3600)).failing_next_with(
                CredentialError::Rejected {
                    gateway: Gateway::Pix,
                    status: 401,
                    message: "invalid_client".into(),
                },
            ),
        );
        let cache = cache_with(source);

        let err = cache.get_token(Gateway::Pix).await.unwrap_err();
        assert!(matches!(err, CredentialError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn unknown_gateway_is_not_configured() {
        let cache = CredentialCache::new();
        let err = cache.get_token(Gateway::Card).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotConfigured(Gateway::Card)));
    }
}
