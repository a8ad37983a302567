//! # Envelopes
//!
//! The signed envelope is the only thing ever exchanged with the gateway,
//! in either direction:
//!
//! ```text
//! Ds_SignatureVersion    HMAC_SHA256_V1
//! Ds_MerchantParameters  base64(JSON object of merchant fields)
//! Ds_Signature           base64(HMAC-SHA256(pepper(order), Ds_MerchantParameters))
//! ```
//!
//! Outbound envelopes are produced by [`request::encode`]. Inbound ones are
//! authenticated and unpacked by [`response::decode`]. Everything in
//! between is a [`MerchantParameters`] map.

pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{
    MAX_MERCHANT_PARAMETERS_LENGTH, MAX_SIGNATURE_LENGTH, MAX_SIGNATURE_VERSION_LENGTH,
};
use crate::error::RedsysError;

pub use request::{encode, PaymentRequest, RefundRequest};
pub use response::{decode, decode_notification, DecodedResponse, TransactionType};

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

pub const DS_SIGNATURE_VERSION: &str = "Ds_SignatureVersion";
pub const DS_MERCHANT_PARAMETERS: &str = "Ds_MerchantParameters";
pub const DS_SIGNATURE: &str = "Ds_Signature";

// Inside decoded responses.
pub const DS_RESPONSE: &str = "Ds_Response";
pub const DS_TRANSACTION_TYPE: &str = "Ds_TransactionType";
pub const DS_AMOUNT: &str = "Ds_Amount";
pub const DS_AUTHORISATION_CODE: &str = "Ds_AuthorisationCode";
pub const DS_ORDER: &str = "Ds_Order";

// ---------------------------------------------------------------------------
// MerchantParameters
// ---------------------------------------------------------------------------

/// An insertion-ordered map of gateway field names to JSON values.
///
/// Order matters only for byte-stability of what we encode: the same map
/// built the same way always serializes to the same bytes, so it always
/// signs to the same signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantParameters(Map<String, Value>);

impl MerchantParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, keeping its original position if already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The field as text. Strings come back as-is, numbers in their JSON
    /// rendering. Anything else is `None`.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Like [`get_text`](Self::get_text), but absence is an error.
    pub fn require_text(&self, key: &str) -> Result<String, RedsysError> {
        self.get_text(key)
            .ok_or_else(|| RedsysError::MissingRequiredField(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for MerchantParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for MerchantParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// SignedEnvelope
// ---------------------------------------------------------------------------

/// The signed triple. Serializes with the gateway's field names, which is
/// also the JSON body shape of REST refund requests and replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(rename = "Ds_SignatureVersion")]
    pub signature_version: String,
    #[serde(rename = "Ds_MerchantParameters")]
    pub merchant_parameters: String,
    #[serde(rename = "Ds_Signature")]
    pub signature: String,
}

impl SignedEnvelope {
    /// Collect an envelope from raw form fields (query string or urlencoded
    /// body). Unknown fields are ignored; the last occurrence of a repeated
    /// field wins. Length limits are checked here, before any crypto runs.
    pub fn from_form_fields<'a, I>(fields: I) -> Result<Self, RedsysError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut version = None;
        let mut parameters = None;
        let mut signature = None;
        for (name, value) in fields {
            match name {
                DS_SIGNATURE_VERSION => version = Some(value),
                DS_MERCHANT_PARAMETERS => parameters = Some(value),
                DS_SIGNATURE => signature = Some(value),
                _ => {}
            }
        }

        let required = |field: Option<&str>, name: &str| {
            field
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| RedsysError::MissingRequiredField(name.to_string()))
        };

        let envelope = Self {
            signature_version: required(version, DS_SIGNATURE_VERSION)?,
            merchant_parameters: required(parameters, DS_MERCHANT_PARAMETERS)?,
            signature: required(signature, DS_SIGNATURE)?,
        };
        envelope.validate_field_lengths()?;
        Ok(envelope)
    }

    /// Reject envelopes whose fields exceed the inbound length limits.
    pub fn validate_field_lengths(&self) -> Result<(), RedsysError> {
        check_length(
            DS_SIGNATURE_VERSION,
            &self.signature_version,
            MAX_SIGNATURE_VERSION_LENGTH,
        )?;
        check_length(DS_SIGNATURE, &self.signature, MAX_SIGNATURE_LENGTH)?;
        check_length(
            DS_MERCHANT_PARAMETERS,
            &self.merchant_parameters,
            MAX_MERCHANT_PARAMETERS_LENGTH,
        )
    }

    /// The three fields as `(name, value)` pairs, ready for hidden inputs.
    pub fn form_fields(&self) -> [(&'static str, &str); 3] {
        [
            (DS_SIGNATURE_VERSION, self.signature_version.as_str()),
            (DS_MERCHANT_PARAMETERS, self.merchant_parameters.as_str()),
            (DS_SIGNATURE, self.signature.as_str()),
        ]
    }
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), RedsysError> {
    let actual = value.chars().count();
    if actual > max {
        return Err(RedsysError::FieldTooLong { field, max, actual });
    }
    Ok(())
}
