//! Billing interval arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, ValidationError};

/// How often a plan bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    fn months(&self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Yearly => 12,
        }
    }

    /// Returns the end of a billing period that starts at `start`.
    ///
    /// Uses calendar months so a period starting on the 31st ends on the last
    /// day of the next month.
    pub fn advance(&self, start: Timestamp) -> Timestamp {
        start.add_months(self.months())
    }

    /// Periodicity code used by the PIX Automático API.
    pub fn pix_periodicity(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "MENSAL",
            BillingInterval::Yearly => "ANUAL",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingInterval::Monthly),
            "yearly" => Ok(BillingInterval::Yearly),
            other => Err(ValidationError::invalid_format(
                "billing_interval",
                format!("unknown interval '{}'", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn monthly_advances_one_calendar_month() {
        let start = Timestamp::parse_rfc3339("2024-03-15T00:00:00Z").unwrap();
        let end = BillingInterval::Monthly.advance(start);
        assert_eq!(end.as_datetime().month(), 4);
        assert_eq!(end.as_datetime().day(), 15);
    }

    #[test]
    fn yearly_advances_twelve_months() {
        let start = Timestamp::parse_rfc3339("2024-02-29T00:00:00Z").unwrap();
        let end = BillingInterval::Yearly.advance(start);
        assert_eq!(end.as_datetime().year(), 2025);
        assert_eq!(end.as_datetime().day(), 28);
    }

    #[test]
    fn maps_to_pix_periodicity_codes() {
        assert_eq!(BillingInterval::Monthly.pix_periodicity(), "MENSAL");
        assert_eq!(BillingInterval::Yearly.pix_periodicity(), "ANUAL");
    }
}
