//! Monetary amounts in minor units.
//!
//! The gateway transmits amounts as integer strings in the currency's
//! minor unit (`"145"` is 1.45 EUR). Merchants think in decimals. This
//! module is the only place the two meet, and it never goes through a
//! float.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RedsysError;

/// A non-negative amount in minor currency units (cents for EUR/USD/GBP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Wrap a count of minor units.
    pub const fn from_minor_units(units: u64) -> Self {
        Self(units)
    }

    /// The count of minor units.
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse the gateway's own integer representation (`Ds_Amount`).
    pub fn from_gateway_str(s: &str) -> Result<Self, RedsysError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RedsysError::InvalidAmount(format!(
                "expected integer minor units, got {:?}",
                s
            )));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|e| RedsysError::InvalidAmount(e.to_string()))
    }

    /// The gateway's representation: minor units, no separator.
    pub fn to_gateway_string(&self) -> String {
        self.0.to_string()
    }
}

/// Parses merchant-facing decimals: `"50"`, `"50.5"`, `"50.50"`.
///
/// More than two fractional digits is refused rather than rounded.
impl FromStr for Amount {
    type Err = RedsysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !digits_only(whole) || !digits_only(frac) {
            return Err(RedsysError::InvalidAmount(format!("not a decimal amount: {:?}", s)));
        }
        if frac.len() > 2 {
            return Err(RedsysError::InvalidAmount(format!(
                "too many decimal places: {:?}",
                s
            )));
        }

        let whole: u64 = whole
            .parse()
            .map_err(|e: std::num::ParseIntError| RedsysError::InvalidAmount(e.to_string()))?;
        let cents: u64 = match frac.len() {
            0 => 0,
            1 => u64::from(frac.as_bytes()[0] - b'0') * 10,
            _ => u64::from(frac.as_bytes()[0] - b'0') * 10 + u64::from(frac.as_bytes()[1] - b'0'),
        };

        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .map(Self)
            .ok_or_else(|| RedsysError::InvalidAmount(format!("amount out of range: {:?}", s)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Self(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_parsing() {
        assert_eq!("50".parse::<Amount>().unwrap().minor_units(), 5000);
        assert_eq!("50.5".parse::<Amount>().unwrap().minor_units(), 5050);
        assert_eq!("50.50".parse::<Amount>().unwrap().minor_units(), 5050);
        assert_eq!("1.45".parse::<Amount>().unwrap().minor_units(), 145);
        assert_eq!("0.07".parse::<Amount>().unwrap().minor_units(), 7);
        assert_eq!("50.".parse::<Amount>().unwrap().minor_units(), 5000);
    }

    #[test]
    fn test_decimal_parsing_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("-5".parse::<Amount>().is_err());
        assert!("1.234".parse::<Amount>().is_err());
        assert!("1,50".parse::<Amount>().is_err());
        assert!(".5".parse::<Amount>().is_err());
        assert!("99999999999999999999".parse::<Amount>().is_err());
    }

    #[test]
    fn test_gateway_representation() {
        let amount = Amount::from_gateway_str("5000").unwrap();
        assert_eq!(amount, Amount::from_minor_units(5000));
        assert_eq!(amount.to_gateway_string(), "5000");
        assert_eq!(amount.to_string(), "50.00");
        assert!(Amount::from_gateway_str("50.00").is_err());
        assert!(Amount::from_gateway_str("").is_err());
    }

    #[test]
    fn test_display_pads_cents() {
        assert_eq!(Amount::from_minor_units(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor_units(145).to_string(), "1.45");
        assert!(Amount::ZERO.is_zero());
    }
}
