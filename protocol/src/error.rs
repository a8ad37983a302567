//! Error types for the Redsys protocol layer.
//!
//! Every fallible operation in the crate returns a [`RedsysError`].
//! Configuration problems are reported separately as [`ConfigError`] so
//! they can be surfaced at startup, before any traffic is handled.

use thiserror::Error;

/// Errors raised while signing, authenticating, decoding or refunding.
#[derive(Debug, Error)]
pub enum RedsysError {
    /// The shared secret is not base64 or not a triple-DES key length.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The recomputed signature does not match the transmitted one.
    ///
    /// Treat as a possible forgery. No state change may follow.
    #[error("signature mismatch - possible tampering")]
    SignatureMismatch,

    /// The envelope's parameters are not valid base64 or not a JSON object.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A field needed for classification is absent from the decoded parameters.
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    /// An inbound form field exceeded its textual length limit.
    #[error("field {field} too long: {actual} characters (max {max})")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Maximum accepted length.
        max: usize,
        /// Length received.
        actual: usize,
    },

    /// The order number does not satisfy the gateway's constraints.
    #[error("invalid order number: {0}")]
    InvalidOrderNumber(String),

    /// An amount could not be parsed or is out of range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The refund endpoint answered with an explicit gateway error.
    #[error("gateway error {code}: {description}")]
    GatewayError {
        /// Gateway error code, e.g. `SIS0059`.
        code: String,
        /// Human-readable description supplied by the gateway.
        description: String,
    },

    /// The refund reply authenticated but its result code denies the refund.
    #[error("refund rejected with response code {code}")]
    RefundRejected {
        /// Raw `Ds_Response` value.
        code: String,
    },

    /// Neither an explicit amount nor a captured amount is available.
    #[error("nothing to refund: no amount given and nothing captured")]
    NothingToRefund,

    /// The HTTP exchange with the gateway failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised when validating a provider configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not supplied or is blank.
    #[error("missing required setting: {0}")]
    MissingField(&'static str),

    /// A field was supplied but its value is unusable.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the setting.
        field: &'static str,
        /// Why it was refused.
        reason: String,
    },

    /// The environment tag is neither `real` nor `test`.
    #[error("unknown environment {0:?} (expected \"real\" or \"test\")")]
    UnknownEnvironment(String),

    /// The configuration document could not be read or parsed.
    #[error("could not load configuration: {0}")]
    Load(String),
}
