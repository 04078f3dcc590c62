//! Payment gateway identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Which payment rail a subscription is billed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    /// PIX Automático recurring debit.
    Pix,
    /// Card billing provider.
    Card,
    /// Not yet bound to a gateway (trial without payment).
    #[default]
    None,
}

impl Gateway {
    /// Gateways that accept inbound webhooks and outbound calls.
    pub const BILLABLE: [Gateway; 2] = [Gateway::Pix, Gateway::Card];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Pix => "pix",
            Gateway::Card => "card",
            Gateway::None => "none",
        }
    }

    /// True for gateways that can carry a recurrence.
    pub fn is_billable(&self) -> bool {
        !matches!(self, Gateway::None)
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pix" => Ok(Gateway::Pix),
            "card" => Ok(Gateway::Card),
            "none" => Ok(Gateway::None),
            other => Err(ValidationError::invalid_format(
                "gateway",
                format!("unknown gateway '{}'", other),
            )),
        }
    }
}
