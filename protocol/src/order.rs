//! # Order Numbers
//!
//! The order number does double duty. It is the merchant's reconciliation
//! key, and it is the plaintext of the key derivation, so a notification
//! can only be authenticated once we know which order it claims to be.
//!
//! The gateway's rules: at most twelve characters, ASCII letters and
//! digits only. When the merchant does not supply one, we synthesise it
//! from the payment id with a configurable prefix and zero padding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_ORDER_NUMBER_PREFIX, MAX_ORDER_NUMBER_LENGTH};
use crate::error::RedsysError;

/// A validated order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Validate and wrap `value`.
    ///
    /// # Errors
    ///
    /// [`RedsysError::InvalidOrderNumber`] when empty, longer than twelve
    /// characters, or containing anything but ASCII letters and digits.
    pub fn new(value: impl Into<String>) -> Result<Self, RedsysError> {
        let value = value.into();
        if value.is_empty() {
            return Err(RedsysError::InvalidOrderNumber(
                "order number is empty".to_string(),
            ));
        }
        if value.len() > MAX_ORDER_NUMBER_LENGTH {
            return Err(RedsysError::InvalidOrderNumber(format!(
                "{:?} is {} characters, max {}",
                value,
                value.len(),
                MAX_ORDER_NUMBER_LENGTH
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(RedsysError::InvalidOrderNumber(format!(
                "{:?} contains characters other than ASCII letters and digits",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = RedsysError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderNumber> for String {
    fn from(order: OrderNumber) -> Self {
        order.0
    }
}

/// How order numbers are produced for payments that do not bring their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNumberPolicy {
    prefix: String,
    min_length: usize,
}

impl Default for OrderNumberPolicy {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
            min_length: 0,
        }
    }
}

impl OrderNumberPolicy {
    pub fn new(prefix: impl Into<String>, min_length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            min_length,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Resolve the order number for a payment.
    ///
    /// An explicit order number is used exactly as given, after validation.
    /// Otherwise the payment id is left-padded with zeros so that
    /// prefix + id reaches `min_length`, and the prefix goes in front:
    /// prefix `TEST`, id `42`, min length 8 gives `TEST0042`.
    pub fn order_number_for(
        &self,
        payment_id: &str,
        explicit: Option<&str>,
    ) -> Result<OrderNumber, RedsysError> {
        if let Some(explicit) = explicit.filter(|s| !s.is_empty()) {
            return OrderNumber::new(explicit);
        }

        let width = self.min_length.saturating_sub(self.prefix.len());
        OrderNumber::new(format!("{}{:0>width$}", self.prefix, payment_id, width = width))
    }
}
