//! # Gateway Configuration & Constants
//!
//! Every magic string the gateway expects lives here: endpoints, paths,
//! field-length limits, the signature version tag and the currency table.
//! None of these are ours to choose. They come from the gateway's
//! integration manual, and the remote side will reject anything else.
//!
//! [`ProviderConfig`] is the merchant-side half: credentials and behaviour
//! flags for one configured provider. It is validated eagerly, so a
//! [`crate::RedsysProvider`] can never be built from a half-filled config.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::SharedSecret;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Production gateway. Real cards, real money.
pub const REAL_ENDPOINT: &str = "https://sis.redsys.es";

/// Integration gateway. Accepts the published test cards only.
pub const TEST_ENDPOINT: &str = "https://sis-t.redsys.es:25443";

/// Path of the hosted payment page the customer's browser posts to.
pub const PAYMENT_FORM_PATH: &str = "/sis/realizarPago";

/// Path of the REST endpoint used for synchronous operations (refunds).
pub const REST_OPERATION_PATH: &str = "/sis/rest/trataPeticionREST";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Signature version tag for HMAC-SHA256 over a 3DES-derived key.
pub const SIGNATURE_VERSION: &str = "HMAC_SHA256_V1";

/// Maximum accepted length of an inbound `Ds_SignatureVersion`.
pub const MAX_SIGNATURE_VERSION_LENGTH: usize = 256;

/// Maximum accepted length of an inbound `Ds_Signature`.
pub const MAX_SIGNATURE_LENGTH: usize = 256;

/// Maximum accepted length of an inbound `Ds_MerchantParameters`.
pub const MAX_MERCHANT_PARAMETERS_LENGTH: usize = 2048;

// ---------------------------------------------------------------------------
// Order numbers
// ---------------------------------------------------------------------------

/// The gateway refuses order numbers longer than twelve characters.
pub const MAX_ORDER_NUMBER_LENGTH: usize = 12;

/// Prefix used when the merchant does not configure one.
pub const DEFAULT_ORDER_NUMBER_PREFIX: &str = "0000";

// ---------------------------------------------------------------------------
// Currencies
// ---------------------------------------------------------------------------

/// Euro, the default when neither payment nor provider says otherwise.
pub const DEFAULT_CURRENCY: &str = "978";

/// ISO 4217 letter codes the gateway wants as numeric codes.
pub const ISO_CURRENCY_LOOKUP: &[(&str, &str)] = &[("EUR", "978"), ("GBP", "826"), ("USD", "840")];

/// Translate an ISO 4217 letter code to the gateway's numeric code.
///
/// Anything not in the table is passed through untouched on the
/// assumption that it is already numeric.
pub fn currency_code(currency: &str) -> String {
    ISO_CURRENCY_LOOKUP
        .iter()
        .find(|(alpha, _)| *alpha == currency)
        .map(|(_, numeric)| (*numeric).to_string())
        .unwrap_or_else(|| currency.to_string())
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Which gateway installation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production.
    Real,
    /// Integration / sandbox.
    #[default]
    Test,
}

impl Environment {
    /// Base URL for this environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Real => REAL_ENDPOINT,
            Self::Test => TEST_ENDPOINT,
        }
    }

    /// The endpoint pair for this environment.
    pub fn endpoints(&self) -> GatewayEndpointSet {
        GatewayEndpointSet::new(self.base_url())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(Self::Real),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// The two gateway URLs a provider needs: the browser form endpoint and
/// the REST operation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpointSet {
    base: String,
}

impl GatewayEndpointSet {
    /// Build an endpoint set rooted at `base` (no trailing slash needed).
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the installation.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Where the customer's browser submits the signed payment form.
    pub fn form_url(&self) -> String {
        format!("{}{}", self.base, PAYMENT_FORM_PATH)
    }

    /// Where refund envelopes are POSTed.
    pub fn rest_url(&self) -> String {
        format!("{}{}", self.base, REST_OPERATION_PATH)
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Settings for one configured provider.
///
/// Loadable from JSON (every optional field has a default) or assembled
/// with [`ProviderConfig::builder`]. Either way, [`ProviderConfig::validate`]
/// runs before the value is handed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Consumer language code shown on the payment page (`001` Spanish,
    /// `002` English, `003` Catalan, ...).
    pub language: String,
    /// Merchant code (FUC) assigned by the bank.
    pub merchant_code: String,
    /// Terminal number.
    pub terminal: String,
    /// Base64 shared secret from the merchant administration module.
    pub shared_secret: SharedSecret,
    /// Default currency, numeric or ISO letters.
    pub currency: String,
    /// Skip the customer-facing confirmation steps on the payment page.
    pub direct_payment: bool,
    /// Which gateway installation to target.
    pub environment: Environment,
    /// Prefix prepended to payment ids when synthesising order numbers.
    pub order_number_prefix: String,
    /// Minimum order-number length; shorter ids are zero-padded.
    pub order_number_min_length: usize,
    /// Send the customer back through the notification URL on redirect
    /// instead of straight to the success/failure pages.
    pub process_on_redirect: bool,
    /// Value sent as `Ds_SignatureVersion`.
    pub signature_version: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            language: String::new(),
            merchant_code: String::new(),
            terminal: String::new(),
            shared_secret: SharedSecret::default(),
            currency: DEFAULT_CURRENCY.to_string(),
            direct_payment: false,
            environment: Environment::Test,
            order_number_prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
            order_number_min_length: 0,
            process_on_redirect: false,
            signature_version: SIGNATURE_VERSION.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Start a builder pre-filled with defaults.
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// `"TRUE"` / `"FALSE"`, the way the gateway spells booleans.
    pub fn direct_payment_flag(&self) -> &'static str {
        if self.direct_payment {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Check every setting. Fails on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_blank("language", &self.language)?;
        require_non_blank("merchant_code", &self.merchant_code)?;
        require_non_blank("terminal", &self.terminal)?;
        require_non_blank("currency", &self.currency)?;
        require_non_blank("signature_version", &self.signature_version)?;

        if self.shared_secret.is_empty() {
            return Err(ConfigError::MissingField("shared_secret"));
        }
        self.shared_secret
            .key_bytes()
            .map_err(|e| ConfigError::InvalidValue {
                field: "shared_secret",
                reason: e.to_string(),
            })?;

        if !self
            .order_number_prefix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue {
                field: "order_number_prefix",
                reason: "must be ASCII alphanumeric".to_string(),
            });
        }
        if self.order_number_prefix.len() >= MAX_ORDER_NUMBER_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "order_number_prefix",
                reason: format!(
                    "must be shorter than {} characters to leave room for the payment id",
                    MAX_ORDER_NUMBER_LENGTH
                ),
            });
        }
        if self.order_number_min_length > MAX_ORDER_NUMBER_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "order_number_min_length",
                reason: format!("cannot exceed {}", MAX_ORDER_NUMBER_LENGTH),
            });
        }

        Ok(())
    }
}

fn require_non_blank(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Fluent construction of a [`ProviderConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn merchant_code(mut self, merchant_code: impl Into<String>) -> Self {
        self.config.merchant_code = merchant_code.into();
        self
    }

    pub fn terminal(mut self, terminal: impl Into<String>) -> Self {
        self.config.terminal = terminal.into();
        self
    }

    pub fn shared_secret(mut self, shared_secret: impl Into<String>) -> Self {
        self.config.shared_secret = SharedSecret::new(shared_secret);
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.config.currency = currency.into();
        self
    }

    pub fn direct_payment(mut self, direct_payment: bool) -> Self {
        self.config.direct_payment = direct_payment;
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn order_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.order_number_prefix = prefix.into();
        self
    }

    pub fn order_number_min_length(mut self, min_length: usize) -> Self {
        self.config.order_number_min_length = min_length;
        self
    }

    pub fn process_on_redirect(mut self, process_on_redirect: bool) -> Self {
        self.config.process_on_redirect = process_on_redirect;
        self
    }

    pub fn signature_version(mut self, signature_version: impl Into<String>) -> Self {
        self.config.signature_version = signature_version.into();
        self
    }

    /// Validate and return the finished configuration.
    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
