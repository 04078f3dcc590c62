//! Academy Billing service
//!
//! Serves the webhook and subscription API and runs the billing sweeper until
//! Ctrl+C or SIGTERM. Storage is PostgreSQL when `ACADEMY_BILLING__DATABASE__URL`
//! is set and in-memory otherwise.

use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use academy_billing::adapters::credentials::{CredentialCache, OAuthTokenClient};
use academy_billing::adapters::gateway::{
    build_http_client, CardAdapter, CardSettings, GatewayHttpClient, PixAdapter,
};
use academy_billing::adapters::http::{self, BillingAppState};
use academy_billing::adapters::memory::{
    InMemoryPaymentLedger, InMemorySubscriptionRepository, InMemoryWebhookEventRepository,
};
use academy_billing::adapters::postgres::{
    self, PostgresPaymentLedger, PostgresSubscriptionRepository, PostgresWebhookEventRepository,
};
use academy_billing::adapters::TracingEventPublisher;
use academy_billing::application::handlers::{
    EventProcessor, ReconcileSubscriptionsHandler, RetrySweep, WebhookIngestor,
};
use academy_billing::application::{
    BillingSweeper, BillingSweeperConfig, GatewayRegistry, SubscriptionLocks,
};
use academy_billing::config::AppConfig;
use academy_billing::domain::billing::Gateway;
use academy_billing::ports::{
    GatewayCredential, PaymentLedger, SubscriptionEventPublisher, SubscriptionRepository,
    WebhookEventRepository,
};

/// Repositories selected at startup.
struct Storage {
    subscriptions: Arc<dyn SubscriptionRepository>,
    ledger: Arc<dyn PaymentLedger>,
    events: Arc<dyn WebhookEventRepository>,
}

impl Storage {
    async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let Some(database) = &config.database else {
            warn!("No database configured; using in-memory storage");
            return Ok(Self {
                subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
                ledger: Arc::new(InMemoryPaymentLedger::new()),
                events: Arc::new(InMemoryWebhookEventRepository::new()),
            });
        };

        let pool = postgres::connect(database)
            .await
            .context("connecting to PostgreSQL")?;
        Ok(Self {
            subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
            ledger: Arc::new(PostgresPaymentLedger::new(pool.clone())),
            events: Arc::new(PostgresWebhookEventRepository::new(pool)),
        })
    }
}

fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.server.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Builds the adapters for every configured gateway over one credential cache.
///
/// The PIX adapter is also returned on its own for provider-specific calls.
fn build_gateways(config: &AppConfig, client: &Client) -> (GatewayRegistry, Option<Arc<PixAdapter>>) {
    let token_source = |base_url: &str| Arc::new(OAuthTokenClient::new(client.clone(), base_url));

    let mut credentials = CredentialCache::new().with_refresh_lead(config.billing.refresh_lead());
    if let Some(pix) = &config.pix {
        credentials = credentials.with_credential(
            GatewayCredential::new(Gateway::Pix, &pix.client_id, pix.client_secret.clone()),
            token_source(&pix.base_url),
        );
    }
    if let Some(card) = &config.card {
        credentials = credentials.with_credential(
            GatewayCredential::new(Gateway::Card, &card.client_id, card.client_secret.clone()),
            token_source(&card.base_url),
        );
    }
    let credentials = Arc::new(credentials);

    let mut registry = GatewayRegistry::new();
    let mut pix_adapter = None;
    if let Some(pix) = &config.pix {
        let http =
            GatewayHttpClient::new(client.clone(), &pix.base_url, credentials.clone(), Gateway::Pix);
        let adapter = Arc::new(PixAdapter::new(http, pix.webhook_secret.clone()));
        registry = registry.with_gateway(adapter.clone());
        pix_adapter = Some(adapter);
    }
    if let Some(card) = &config.card {
        let http =
            GatewayHttpClient::new(client.clone(), &card.base_url, credentials.clone(), Gateway::Card);
        let mut settings = CardSettings::new(&card.success_url, &card.cancel_url)
            .with_signature_tolerance_secs(config.webhook.signature_tolerance_secs);
        if let Some(secret) = &card.webhook_secret {
            settings = settings.with_webhook_secret(secret.clone());
        }
        registry = registry.with_gateway(Arc::new(CardAdapter::new(http, settings)));
    }
    (registry, pix_adapter)
}

/// Points the PIX key's notifications at this service unless they already are.
///
/// Failures are logged; the service still starts and the registration can be
/// fixed by hand.
async fn ensure_pix_webhook(adapter: &PixAdapter, pix_key: &str, webhook_url: &str) {
    match adapter.webhook(pix_key).await {
        Ok(Some(current)) if current.webhook_url == webhook_url => {
            info!(pix_key, "PIX webhook already registered");
            return;
        }
        Ok(Some(current)) => {
            warn!(pix_key, previous = %current.webhook_url, "Replacing PIX webhook registration")
        }
        Ok(None) => {}
        Err(e) => warn!(pix_key, error = %e, "Could not read PIX webhook registration"),
    }

    if let Err(e) = adapter.register_webhook(pix_key, webhook_url).await {
        warn!(pix_key, error = %e, "PIX webhook registration failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration and logging
    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config);
    let addr = config.server.socket_addr();

    info!(
        environment = ?config.server.environment,
        pix = config.pix.is_some(),
        card = config.card.is_some(),
        "Starting academy-billing"
    );

    // 2. Storage and gateways
    let storage = Storage::connect(&config).await?;
    let client = build_http_client(config.billing.http_timeout()).context("building HTTP client")?;
    let (gateways, pix_adapter) = build_gateways(&config, &client);
    if gateways.is_empty() {
        warn!("No gateway configured; every webhook will be rejected");
    }
    if let (Some(adapter), Some(pix)) = (&pix_adapter, &config.pix) {
        if let Some((pix_key, webhook_url)) = pix.webhook_registration() {
            ensure_pix_webhook(adapter, pix_key, webhook_url).await;
        }
    }

    // 3. Application services
    let publisher: Arc<dyn SubscriptionEventPublisher> = Arc::new(TracingEventPublisher::new());
    let locks = Arc::new(SubscriptionLocks::new());
    let processor = Arc::new(
        EventProcessor::new(
            storage.events.clone(),
            storage.subscriptions.clone(),
            storage.ledger.clone(),
            publisher.clone(),
            locks.clone(),
        )
        .with_stale_after(config.billing.processing_stale()),
    );
    let ingestor = Arc::new(
        WebhookIngestor::new(gateways.clone(), storage.events.clone())
            .with_processor(processor.clone()),
    );
    let retry_sweep = Arc::new(
        RetrySweep::new(storage.events.clone(), processor)
            .with_policy(config.billing.claim_policy())
            .with_batch_size(config.billing.sweep_batch_size),
    );
    let reconciler = Arc::new(
        ReconcileSubscriptionsHandler::new(
            storage.subscriptions.clone(),
            gateways.clone(),
            publisher.clone(),
            locks.clone(),
        )
        .with_grace_period(config.billing.grace_period())
        .with_payment_recovery(storage.ledger.clone(), storage.events.clone()),
    );

    // 4. Background sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = BillingSweeper::new(
        retry_sweep,
        reconciler,
        storage.events.clone(),
        BillingSweeperConfig::default()
            .with_interval(config.billing.sweep_interval())
            .with_archive_after(config.billing.archive_after()),
    );
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    // 5. HTTP server
    let state = BillingAppState {
        ingestor,
        subscriptions: storage.subscriptions.clone(),
        gateways,
        publisher,
        locks,
        max_body_bytes: config.webhook.max_body_bytes,
    };
    let app = http::app(state, config.server.request_timeout());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    // 6. Drain the sweeper
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Billing sweeper task ended abnormally");
    }
    info!("Shutdown complete");
    Ok(())
}
