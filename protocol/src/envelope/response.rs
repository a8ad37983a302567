//! Inbound envelopes: authenticate first, parse second.
//!
//! The signature is checked against the parameters *text* exactly as it
//! arrived. Only once it matches do we base64-decode and parse the JSON,
//! so an attacker never gets our parser to run on unauthenticated input.

use std::fmt;
use std::num::IntErrorKind;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{MerchantParameters, SignedEnvelope, DS_RESPONSE, DS_TRANSACTION_TYPE};
use crate::amount::Amount;
use crate::crypto::keys::SharedSecret;
use crate::crypto::signatures::verify;
use crate::envelope::{DS_AMOUNT, DS_AUTHORISATION_CODE, DS_ORDER};
use crate::error::RedsysError;

/// Standard alphabet, padding optional. URL-safe input is mapped onto the
/// standard alphabet before decoding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// ---------------------------------------------------------------------------
// Transaction types
// ---------------------------------------------------------------------------

/// The gateway's `Ds_TransactionType` vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransactionType {
    /// `0`: authorisation, funds captured.
    Payment,
    /// `1`: preauthorisation, funds held.
    Preauthorization,
    /// `2`: confirmation of an earlier preauthorisation.
    Confirmation,
    /// `3`: automatic refund.
    Refund,
    /// `9`: cancellation of a preauthorisation.
    Cancellation,
    /// Anything else, kept verbatim.
    Other(String),
}

impl TransactionType {
    pub fn code(&self) -> &str {
        match self {
            Self::Payment => "0",
            Self::Preauthorization => "1",
            Self::Confirmation => "2",
            Self::Refund => "3",
            Self::Cancellation => "9",
            Self::Other(code) => code.as_str(),
        }
    }
}

/// Exact match. `" 0"` is not `0`.
impl From<&str> for TransactionType {
    fn from(code: &str) -> Self {
        match code {
            "0" => Self::Payment,
            "1" => Self::Preauthorization,
            "2" => Self::Confirmation,
            "3" => Self::Refund,
            "9" => Self::Cancellation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TransactionType {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<TransactionType> for String {
    fn from(tt: TransactionType) -> Self {
        tt.code().to_string()
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// DecodedResponse
// ---------------------------------------------------------------------------

/// Authenticated merchant parameters plus the two fields classification
/// needs, already extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResponse {
    parameters: MerchantParameters,
    response_code: i64,
    raw_response_code: String,
    transaction_type: TransactionType,
}

impl DecodedResponse {
    /// Extract `Ds_Response` and `Ds_TransactionType` from `parameters`.
    ///
    /// `Ds_Response` may be a digit string (`"0000"`) or a JSON number. It
    /// is signed, and saturates at the `i64` bounds rather than failing.
    ///
    /// `Ds_TransactionType` is only recognised as a string. A number or any
    /// other JSON value is kept as [`TransactionType::Other`].
    pub fn from_parameters(parameters: MerchantParameters) -> Result<Self, RedsysError> {
        let raw_response_code = parameters.require_text(DS_RESPONSE)?;
        let response_code = parse_response_code(&raw_response_code).ok_or_else(|| {
            RedsysError::MalformedEnvelope(format!(
                "{} is not numeric: {:?}",
                DS_RESPONSE, raw_response_code
            ))
        })?;
        let transaction_type = match parameters.get(DS_TRANSACTION_TYPE) {
            Some(Value::String(code)) => TransactionType::from(code.as_str()),
            Some(other) => TransactionType::Other(other.to_string()),
            None => {
                return Err(RedsysError::MissingRequiredField(
                    DS_TRANSACTION_TYPE.to_string(),
                ))
            }
        };

        Ok(Self {
            parameters,
            response_code,
            raw_response_code,
            transaction_type,
        })
    }

    pub fn parameters(&self) -> &MerchantParameters {
        &self.parameters
    }

    /// `Ds_Response` as a number.
    pub fn response_code(&self) -> i64 {
        self.response_code
    }

    /// `Ds_Response` exactly as transmitted, leading zeros and all.
    pub fn raw_response_code(&self) -> &str {
        &self.raw_response_code
    }

    pub fn transaction_type(&self) -> &TransactionType {
        &self.transaction_type
    }

    /// `Ds_Amount` in minor units.
    pub fn amount(&self) -> Result<Amount, RedsysError> {
        Amount::from_gateway_str(&self.parameters.require_text(DS_AMOUNT)?)
    }

    /// `Ds_AuthorisationCode`, trimmed. The gateway pads it with spaces.
    pub fn authorisation_code(&self) -> Result<String, RedsysError> {
        self.parameters
            .require_text(DS_AUTHORISATION_CODE)
            .map(|code| code.trim().to_string())
    }

    pub fn order(&self) -> Option<String> {
        self.parameters.get_text(DS_ORDER)
    }
}

fn parse_response_code(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(code) => Some(code),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Authenticate `envelope` against `expected_order` and return its
/// parameters, without requiring any particular field.
///
/// # Errors
///
/// - [`RedsysError::SignatureMismatch`]: treat as tampering.
/// - [`RedsysError::MalformedEnvelope`]: not base64, not UTF-8, or not a
///   JSON object.
pub fn authenticate(
    envelope: &SignedEnvelope,
    expected_order: &str,
    secret: &SharedSecret,
) -> Result<MerchantParameters, RedsysError> {
    if let Err(e) = verify(
        expected_order,
        &envelope.merchant_parameters,
        secret,
        &envelope.signature,
    ) {
        if matches!(e, RedsysError::SignatureMismatch) {
            warn!(order = expected_order, "signature mismatch on inbound envelope");
        }
        return Err(e);
    }

    let bytes = decode_base64_lenient(&envelope.merchant_parameters)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RedsysError::MalformedEnvelope(format!("parameters are not UTF-8: {}", e)))?;
    let map: Map<String, Value> = match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(RedsysError::MalformedEnvelope(format!(
                "parameters are not a JSON object: {}",
                type_name(&other)
            )))
        }
        Err(e) => {
            return Err(RedsysError::MalformedEnvelope(format!(
                "parameters are not JSON: {}",
                e
            )))
        }
    };

    debug!(order = expected_order, fields = map.len(), "envelope authenticated");
    Ok(MerchantParameters::from(map))
}

/// Authenticate and decode a gateway response.
pub fn decode(
    envelope: &SignedEnvelope,
    expected_order: &str,
    secret: &SharedSecret,
) -> Result<DecodedResponse, RedsysError> {
    DecodedResponse::from_parameters(authenticate(envelope, expected_order, secret)?)
}

/// [`decode`] for browser/server notifications: inbound length limits are
/// enforced before any cryptographic work.
pub fn decode_notification(
    envelope: &SignedEnvelope,
    expected_order: &str,
    secret: &SharedSecret,
) -> Result<DecodedResponse, RedsysError> {
    envelope.validate_field_lengths()?;
    decode(envelope, expected_order, secret)
}

/// Base64 with the gateway's quirks tolerated: embedded ASCII whitespace,
/// URL-safe alphabet, missing padding.
pub fn decode_base64_lenient(text: &str) -> Result<Vec<u8>, RedsysError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    LENIENT
        .decode(cleaned)
        .map_err(|e| RedsysError::MalformedEnvelope(format!("parameters are not base64: {}", e)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::request::encode;
    use base64::engine::general_purpose::STANDARD;

    const TEST_SECRET: &str = "sq7HjrUOBfKmC576ILgskD5srU870gJ7";

    // A notification for a 50.00 EUR sale on order TEST42, serialized with
    // spaces after separators the way the gateway's own samples are.
    const NOTIFICATION_PARAMS: &str = "eyJEc19EYXRlIjogIjE4LzEwLzIwMjYiLCAiRHNfQW1vdW50IjogIjUwMDAiLCAiRHNfQ3VycmVuY3kiOiAiOTc4IiwgIkRzX09yZGVyIjogIlRFU1Q0MiIsICJEc19SZXNwb25zZSI6ICIwMDAwIiwgIkRzX1RyYW5zYWN0aW9uVHlwZSI6ICIwIiwgIkRzX0F1dGhvcmlzYXRpb25Db2RlIjogIjQ4MjkxMyJ9";
    const NOTIFICATION_SIGNATURE: &str = "RxNAkC69v7pRGXCqnqa6iMzi3TLTkzKaNpHRz4MTTQI=";

    fn secret() -> SharedSecret {
        SharedSecret::new(TEST_SECRET)
    }

    fn notification() -> SignedEnvelope {
        SignedEnvelope {
            signature_version: "HMAC_SHA256_V1".into(),
            merchant_parameters: NOTIFICATION_PARAMS.into(),
            signature: NOTIFICATION_SIGNATURE.into(),
        }
    }

    #[test]
    fn test_decode_known_notification() {
        let decoded = decode(&notification(), "TEST42", &secret()).unwrap();
        assert_eq!(decoded.response_code(), 0);
        assert_eq!(decoded.raw_response_code(), "0000");
        assert_eq!(decoded.transaction_type(), &TransactionType::Payment);
        assert_eq!(decoded.amount().unwrap(), Amount::from_minor_units(5000));
        assert_eq!(decoded.authorisation_code().unwrap(), "482913");
        assert_eq!(decoded.order().as_deref(), Some("TEST42"));
        assert_eq!(decoded.parameters().len(), 7);
    }

    #[test]
    fn test_decode_wrong_order_is_mismatch() {
        let err = decode(&notification(), "TEST43", &secret()).unwrap_err();
        assert!(matches!(err, RedsysError::SignatureMismatch));
    }

    #[test]
    fn test_decode_url_safe_signature() {
        let mut envelope = notification();
        envelope.signature = NOTIFICATION_SIGNATURE.replace('+', "-").replace('/', "_");
        assert!(decode(&envelope, "TEST42", &secret()).is_ok());
    }

    #[test]
    fn test_round_trip_preserves_parameters() {
        let params = MerchantParameters::new()
            .with("Ds_Response", "0900")
            .with("Ds_TransactionType", "3")
            .with("Ds_Amount", 1250)
            .with("Ds_Order", "000042");
        let envelope = encode("000042", &params, &secret(), "HMAC_SHA256_V1").unwrap();
        let decoded = decode(&envelope, "000042", &secret()).unwrap();
        assert_eq!(decoded.parameters(), &params);
        assert_eq!(decoded.response_code(), 900);
        assert_eq!(decoded.transaction_type(), &TransactionType::Refund);
    }

    #[test]
    fn test_numeric_response_code_accepted() {
        let params = MerchantParameters::new()
            .with("Ds_Response", 101)
            .with("Ds_TransactionType", "0");
        let envelope = encode("A1", &params, &secret(), "HMAC_SHA256_V1").unwrap();
        assert_eq!(decode(&envelope, "A1", &secret()).unwrap().response_code(), 101);
    }

    #[test]
    fn test_response_code_outside_u32() {
        let decoded = |code: serde_json::Value| {
            DecodedResponse::from_parameters(
                MerchantParameters::new()
                    .with("Ds_Response", code)
                    .with("Ds_TransactionType", "0"),
            )
            .unwrap()
            .response_code()
        };
        assert_eq!(decoded("4294967296".into()), 4_294_967_296);
        assert_eq!(decoded("-5".into()), -5);
        assert_eq!(decoded((-5).into()), -5);
        assert_eq!(decoded("99999999999999999999".into()), i64::MAX);
        assert_eq!(decoded("-99999999999999999999".into()), i64::MIN);
    }

    #[test]
    fn test_transaction_type_must_be_exact_string() {
        let transaction_type = |value: serde_json::Value| {
            DecodedResponse::from_parameters(
                MerchantParameters::new()
                    .with("Ds_Response", "0000")
                    .with("Ds_TransactionType", value),
            )
            .unwrap()
            .transaction_type()
            .clone()
        };
        assert_eq!(transaction_type("0".into()), TransactionType::Payment);
        assert_eq!(transaction_type(" 0".into()), TransactionType::Other(" 0".into()));
        assert_eq!(transaction_type(0.into()), TransactionType::Other("0".into()));
        assert_ne!(transaction_type(0.into()), TransactionType::Payment);
    }

    #[test]
    fn test_missing_required_fields() {
        let params = MerchantParameters::new().with("Ds_TransactionType", "0");
        let envelope = encode("A1", &params, &secret(), "HMAC_SHA256_V1").unwrap();
        assert!(matches!(
            decode(&envelope, "A1", &secret()),
            Err(RedsysError::MissingRequiredField(f)) if f == "Ds_Response"
        ));

        let params = MerchantParameters::new().with("Ds_Response", "0000");
        let envelope = encode("A1", &params, &secret(), "HMAC_SHA256_V1").unwrap();
        assert!(matches!(
            decode(&envelope, "A1", &secret()),
            Err(RedsysError::MissingRequiredField(f)) if f == "Ds_TransactionType"
        ));
    }

    #[test]
    fn test_non_numeric_response_code() {
        let params = MerchantParameters::new()
            .with("Ds_Response", "OK")
            .with("Ds_TransactionType", "0");
        let envelope = encode("A1", &params, &secret(), "HMAC_SHA256_V1").unwrap();
        assert!(matches!(
            decode(&envelope, "A1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_authenticated_garbage_is_malformed() {
        // Correctly signed, but the payload is a JSON array.
        let payload = STANDARD.encode(b"[1,2,3]");
        let signature =
            crate::crypto::signatures::sign_to_base64("A1", &payload, &secret()).unwrap();
        let envelope = SignedEnvelope {
            signature_version: "HMAC_SHA256_V1".into(),
            merchant_parameters: payload,
            signature,
        };
        assert!(matches!(
            decode(&envelope, "A1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));

        // Correctly signed, but not base64.
        let payload = "!!not-base64!!".to_string();
        let signature =
            crate::crypto::signatures::sign_to_base64("A1", &payload, &secret()).unwrap();
        let envelope = SignedEnvelope {
            signature_version: "HMAC_SHA256_V1".into(),
            merchant_parameters: payload,
            signature,
        };
        assert!(matches!(
            decode(&envelope, "A1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_notification_checks_length_first() {
        let mut envelope = notification();
        envelope.merchant_parameters.push_str(&" ".repeat(2048));
        assert!(matches!(
            decode_notification(&envelope, "TEST42", &secret()),
            Err(RedsysError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn test_lenient_base64() {
        assert_eq!(decode_base64_lenient("eyJB\nIjoiQiJ9").unwrap(), b"{\"A\":\"B\"}");
        assert_eq!(decode_base64_lenient("YQ").unwrap(), b"a");
        assert_eq!(decode_base64_lenient("YQ==").unwrap(), b"a");
        assert_eq!(decode_base64_lenient("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64_lenient("Y").is_err());
    }

    #[test]
    fn test_transaction_type_vocabulary() {
        assert_eq!(TransactionType::from("0"), TransactionType::Payment);
        assert_eq!(TransactionType::from("1"), TransactionType::Preauthorization);
        assert_eq!(TransactionType::from("2"), TransactionType::Confirmation);
        assert_eq!(TransactionType::from("3"), TransactionType::Refund);
        assert_eq!(TransactionType::from("9"), TransactionType::Cancellation);
        assert_eq!(
            TransactionType::from("O"),
            TransactionType::Other("O".to_string())
        );
        assert_eq!(TransactionType::Other("7".into()).to_string(), "7");
    }
}
