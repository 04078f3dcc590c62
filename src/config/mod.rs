//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `ACADEMY_BILLING` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use academy_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod billing;
mod database;
mod error;
mod gateways;
mod server;
mod webhook;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use gateways::{CardConfig, PixConfig};
pub use server::{Environment, ServerConfig};
pub use webhook::WebhookConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL storage; in-memory storage when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// PIX Automático gateway; disabled when absent
    #[serde(default)]
    pub pix: Option<PixConfig>,

    /// Card gateway; disabled when absent
    #[serde(default)]
    pub card: Option<CardConfig>,

    /// Webhook endpoint limits
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Grace period, sweeps and token refresh
    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `ACADEMY_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `ACADEMY_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `ACADEMY_BILLING__PIX__CLIENT_ID=...` -> `pix.client_id = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types
    /// or a present section misses a required field.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("ACADEMY_BILLING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Production additionally requires HTTPS gateway URLs and a webhook
    /// secret for every enabled gateway.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let production = self.is_production();
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(pix) = &self.pix {
            pix.validate(production)?;
        }
        if let Some(card) = &self.card {
            card.validate(production)?;
        }
        if production && self.pix.is_none() && self.card.is_none() {
            return Err(ValidationError::NoGatewayConfigured);
        }
        self.webhook.validate()?;
        self.billing.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
