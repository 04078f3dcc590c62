//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Database pool size must be between 1 and {0}")]
    InvalidPoolSize(u32),

    #[error("Invalid {0} base URL")]
    InvalidBaseUrl(&'static str),

    #[error("Gateway base URL must use HTTPS in production: {0}")]
    BaseUrlMustBeHttps(&'static str),

    #[error("Webhook secret required in production for gateway: {0}")]
    WebhookSecretRequired(&'static str),

    #[error("PIX sandbox mode is not allowed in production")]
    SandboxInProduction,

    #[error("No payment gateway configured")]
    NoGatewayConfigured,

    #[error("Invalid billing setting: {0}")]
    InvalidBillingSetting(&'static str),

    #[error("Invalid webhook setting: {0}")]
    InvalidWebhookSetting(&'static str),
}
