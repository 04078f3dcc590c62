//! Payment gateway configuration (PIX Automático and card)

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// PIX Automático gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PixConfig {
    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: SecretString,

    /// API base URL; also hosts the token endpoint
    #[serde(default = "default_pix_base_url")]
    pub base_url: String,

    /// Use the provider's homologation environment
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,

    /// HMAC-SHA256 secret for `X-Signature`
    pub webhook_secret: Option<SecretString>,

    /// Receiving PIX key whose notifications we subscribe to
    pub pix_key: Option<String>,

    /// Public URL registered for the key at startup
    pub webhook_url: Option<String>,
}

impl PixConfig {
    /// Key and URL to register, when both are set
    pub fn webhook_registration(&self) -> Option<(&str, &str)> {
        match (&self.pix_key, &self.webhook_url) {
            (Some(key), Some(url)) => Some((key.as_str(), url.as_str())),
            _ => None,
        }
    }

    /// Validate PIX configuration
    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("PIX__CLIENT_ID"));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("PIX__CLIENT_SECRET"));
        }
        validate_base_url(&self.base_url, "pix", production)?;
        if let Some(url) = &self.webhook_url {
            if !url.starts_with("https://") {
                return Err(ValidationError::InvalidWebhookSetting("pix webhook_url must use https"));
            }
            if self.pix_key.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(ValidationError::MissingRequired("PIX__PIX_KEY"));
            }
        }
        if production {
            if self.sandbox {
                return Err(ValidationError::SandboxInProduction);
            }
            if !has_secret(&self.webhook_secret) {
                return Err(ValidationError::WebhookSecretRequired("pix"));
            }
        }
        Ok(())
    }
}

/// Card gateway configuration (hosted checkout)
#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: SecretString,

    /// API base URL; also hosts the token endpoint
    pub base_url: String,

    /// Secret for the timestamped `X-Webhook-Signature`
    pub webhook_secret: Option<SecretString>,

    /// Where checkout redirects after payment
    pub success_url: String,

    /// Where checkout redirects when the payer backs out
    pub cancel_url: String,
}

impl CardConfig {
    /// Validate card configuration
    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("CARD__CLIENT_ID"));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("CARD__CLIENT_SECRET"));
        }
        validate_base_url(&self.base_url, "card", production)?;
        if self.success_url.is_empty() {
            return Err(ValidationError::MissingRequired("CARD__SUCCESS_URL"));
        }
        if self.cancel_url.is_empty() {
            return Err(ValidationError::MissingRequired("CARD__CANCEL_URL"));
        }
        if production && !has_secret(&self.webhook_secret) {
            return Err(ValidationError::WebhookSecretRequired("card"));
        }
        Ok(())
    }
}

fn validate_base_url(
    url: &str,
    gateway: &'static str,
    production: bool,
) -> Result<(), ValidationError> {
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(ValidationError::InvalidBaseUrl(gateway));
    }
    if production && !url.starts_with("https://") {
        return Err(ValidationError::BaseUrlMustBeHttps(gateway));
    }
    Ok(())
}

fn has_secret(secret: &Option<SecretString>) -> bool {
    secret
        .as_ref()
        .map(|s| !s.expose_secret().is_empty())
        .unwrap_or(false)
}

fn default_pix_base_url() -> String {
    "https://pix-h.api.efipay.com.br".to_string()
}

fn default_sandbox() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::new(value.to_string())
    }

    fn pix() -> PixConfig {
        PixConfig {
            client_id: "Client_Id_abc".to_string(),
            client_secret: secret("Client_Secret_xyz"),
            base_url: default_pix_base_url(),
            sandbox: true,
            webhook_secret: None,
            pix_key: None,
            webhook_url: None,
        }
    }

    fn card() -> CardConfig {
        CardConfig {
            client_id: "card-client".to_string(),
            client_secret: secret("card-secret"),
            base_url: "https://api.cards.example".to_string(),
            webhook_secret: Some(secret("whsec_1")),
            success_url: "https://academia.example/ok".to_string(),
            cancel_url: "https://academia.example/cancel".to_string(),
        }
    }

    #[test]
    fn test_pix_sandbox_is_fine_outside_production() {
        assert!(pix().validate(false).is_ok());
    }

    #[test]
    fn test_pix_production_requires_live_mode_and_secret() {
        assert_eq!(pix().validate(true), Err(ValidationError::SandboxInProduction));

        let mut live = pix();
        live.sandbox = false;
        live.base_url = "https://pix.api.efipay.com.br".to_string();
        assert_eq!(live.validate(true), Err(ValidationError::WebhookSecretRequired("pix")));

        live.webhook_secret = Some(secret("hmac"));
        assert!(live.validate(true).is_ok());
    }

    #[test]
    fn test_pix_webhook_url_needs_key_and_https() {
        let mut config = pix();
        config.webhook_url = Some("https://billing.academia.example/webhooks/pix".to_string());
        assert_eq!(
            config.validate(false),
            Err(ValidationError::MissingRequired("PIX__PIX_KEY"))
        );
        assert!(config.webhook_registration().is_none());

        config.pix_key = Some("cobranca@academia.example".to_string());
        assert!(config.validate(false).is_ok());
        assert_eq!(
            config.webhook_registration(),
            Some((
                "cobranca@academia.example",
                "https://billing.academia.example/webhooks/pix"
            ))
        );

        config.webhook_url = Some("http://billing.academia.example/webhooks/pix".to_string());
        assert!(matches!(
            config.validate(false),
            Err(ValidationError::InvalidWebhookSetting(_))
        ));
    }

    #[test]
    fn test_missing_client_credentials() {
        let mut config = pix();
        config.client_id = " ".to_string();
        assert!(config.validate(false).is_err());

        let mut config = card();
        config.client_secret = secret("");
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_card_production_requires_https() {
        let mut config = card();
        config.base_url = "http://api.cards.example".to_string();

        assert!(config.validate(false).is_ok());
        assert_eq!(config.validate(true), Err(ValidationError::BaseUrlMustBeHttps("card")));
    }

    #[test]
    fn test_card_requires_redirect_urls() {
        let mut config = card();
        config.cancel_url.clear();
        assert_eq!(
            config.validate(false),
            Err(ValidationError::MissingRequired("CARD__CANCEL_URL"))
        );
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let rendered = format!("{:?}", card());
        assert!(!rendered.contains("card-secret"));
        assert!(!rendered.contains("whsec_1"));
    }
}
