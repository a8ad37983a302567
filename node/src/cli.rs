//! # CLI Interface
//!
//! Defines the command-line argument structure for `redsys-node` using
//! `clap` derive. Four subcommands: `serve`, `sign`, `verify` and
//! `version`.
//!
//! Provider settings come from a JSON file (`--config`), from flags, or
//! from `REDSYS_*` environment variables. Flags override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use redsys_protocol::ProviderConfig;

use crate::logging::LogFormat;

/// Redsys payment gateway node.
///
/// Serves the merchant side of a Redsys integration over HTTP: builds
/// signed payment forms, authenticates gateway notifications, issues
/// refunds, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "redsys-node",
    about = "Redsys payment gateway node",
    version,
    propagate_version = true
)]
pub struct RedsysNodeCli {
    /// Log output format.
    #[arg(
        long,
        global = true,
        value_enum,
        env = "REDSYS_LOG_FORMAT",
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service.
    Serve(ServeArgs),
    /// Print the signed payment form for an ad-hoc payment.
    Sign(SignArgs),
    /// Authenticate and decode an envelope received from the gateway.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Merchant credentials and provider behaviour.
#[derive(Args, Debug, Clone, Default)]
pub struct ProviderArgs {
    /// JSON provider configuration. Flags below override its fields.
    #[arg(long, short = 'c', env = "REDSYS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Merchant code (FUC).
    #[arg(long, env = "REDSYS_MERCHANT_CODE")]
    pub merchant_code: Option<String>,

    /// Terminal number.
    #[arg(long, env = "REDSYS_TERMINAL")]
    pub terminal: Option<String>,

    /// Base64 shared secret from the merchant administration module.
    #[arg(long, env = "REDSYS_SHARED_SECRET", hide_env_values = true)]
    pub shared_secret: Option<String>,

    /// Consumer language code (001 Spanish, 002 English, ...).
    #[arg(long, env = "REDSYS_LANGUAGE")]
    pub language: Option<String>,

    /// Default currency, ISO letters or numeric.
    #[arg(long, env = "REDSYS_CURRENCY")]
    pub currency: Option<String>,

    /// Gateway environment: `real` or `test`.
    #[arg(long, env = "REDSYS_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Prefix for generated order numbers.
    #[arg(long, env = "REDSYS_ORDER_PREFIX")]
    pub order_prefix: Option<String>,

    /// Minimum length of generated order numbers.
    #[arg(long, env = "REDSYS_ORDER_MIN_LENGTH")]
    pub order_min_length: Option<usize>,

    /// Ask the gateway to skip its confirmation steps.
    #[arg(long, env = "REDSYS_DIRECT_PAYMENT")]
    pub direct_payment: Option<bool>,

    /// Route the customer's redirect through the notification handler.
    #[arg(long, env = "REDSYS_PROCESS_ON_REDIRECT")]
    pub process_on_redirect: Option<bool>,
}

impl ProviderArgs {
    /// Merge file and flags into a validated configuration.
    pub fn into_config(self) -> Result<ProviderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str::<ProviderConfig>(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => ProviderConfig::default(),
        };

        if let Some(v) = self.merchant_code {
            config.merchant_code = v;
        }
        if let Some(v) = self.terminal {
            config.terminal = v;
        }
        if let Some(v) = self.shared_secret {
            config.shared_secret = redsys_protocol::crypto::SharedSecret::new(v);
        }
        if let Some(v) = self.language {
            config.language = v;
        }
        if let Some(v) = self.currency {
            config.currency = v;
        }
        if let Some(v) = self.environment {
            config.environment = v.parse()?;
        }
        if let Some(v) = self.order_prefix {
            config.order_number_prefix = v;
        }
        if let Some(v) = self.order_min_length {
            config.order_number_min_length = v;
        }
        if let Some(v) = self.direct_payment {
            config.direct_payment = v;
        }
        if let Some(v) = self.process_on_redirect {
            config.process_on_redirect = v;
        }

        config.validate().context("invalid provider configuration")?;
        Ok(config)
    }
}

/// Arguments for the `serve` subcommand.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Address to bind both listeners to.
    #[arg(long, env = "REDSYS_LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    /// Port for the payment API.
    #[arg(long, env = "REDSYS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "REDSYS_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Externally reachable base URL of this service. The gateway posts
    /// notifications here, so it must be reachable from the internet.
    #[arg(long, env = "REDSYS_PUBLIC_URL", default_value = "http://127.0.0.1:8080")]
    pub public_url: String,

    /// Override the gateway base URL (for a local stand-in).
    #[arg(long, env = "REDSYS_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Timeout for refund calls to the gateway, in seconds.
    #[arg(long, env = "REDSYS_REFUND_TIMEOUT_SECS", default_value_t = 30)]
    pub refund_timeout_secs: u64,
}

/// Arguments for the `sign` subcommand.
#[derive(Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Payment identifier used to derive the order number.
    #[arg(long)]
    pub payment_id: u64,

    /// Amount in major units, e.g. `49.95`.
    #[arg(long)]
    pub amount: String,

    /// Currency for this payment, overriding the provider default.
    #[arg(long)]
    pub payment_currency: Option<String>,

    /// Explicit order number instead of a generated one.
    #[arg(long)]
    pub order_number: Option<String>,

    /// Base URL used for the notification and redirect URLs.
    #[arg(long, env = "REDSYS_PUBLIC_URL", default_value = "http://127.0.0.1:8080")]
    pub public_url: String,
}

/// Arguments for the `verify` subcommand.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Order number the envelope should be signed for.
    #[arg(long)]
    pub order: String,

    /// `Ds_MerchantParameters` value.
    #[arg(long)]
    pub parameters: String,

    /// `Ds_Signature` value.
    #[arg(long)]
    pub signature: String,

    /// `Ds_SignatureVersion` value.
    #[arg(long, default_value = redsys_protocol::config::SIGNATURE_VERSION)]
    pub signature_version: String,
}
