// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Redsys Protocol: Core Library
//!
//! The signing and validation layer that sits between a merchant application
//! and the Redsys card-payment gateway. Outbound payment and refund requests
//! leave this crate as tamper-evident envelopes; inbound notifications and
//! refund replies are authenticated here before anything touches a payment
//! record.
//!
//! The gateway's scheme is old and unforgiving: a per-order key ("pepper")
//! is derived by triple-DES encrypting the order number with the merchant
//! secret, and that pepper keys an HMAC-SHA256 over the base64 parameter
//! blob. Both sides recompute it independently, so every byte has to match.
//!
//! ## Architecture
//!
//! - **crypto**: Key derivation and the HMAC signer. Bit-exact with the gateway.
//! - **order**: Order numbers: the merchant's reconciliation key and the salt.
//! - **envelope**: Merchant parameters, the signed envelope, request and
//!   response codecs.
//! - **outcome**: Response classification and the status updates it produces.
//! - **refund**: The synchronous refund round trip over HTTP.
//! - **provider**: The façade tying configuration, codecs and records together.
//! - **config**: Endpoints, field limits, currency table, provider settings.
//!
//! ## Ground rules
//!
//! 1. Nothing mutates a payment record unless the envelope authenticated.
//! 2. Amounts are integers in minor units. No floats near money.
//! 3. Unknown gateway combinations are logged and left alone.

pub mod amount;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod order;
pub mod outcome;
pub mod provider;
pub mod refund;

mod error;

pub use amount::Amount;
pub use config::{Environment, GatewayEndpointSet, ProviderConfig};
pub use envelope::{DecodedResponse, MerchantParameters, SignedEnvelope, TransactionType};
pub use error::{ConfigError, RedsysError};
pub use order::{OrderNumber, OrderNumberPolicy};
pub use outcome::{PaymentOutcome, PaymentRecord, PaymentStatus, StatusUpdate};
pub use provider::{NotificationDisposition, PaymentForm, RedsysProvider};
pub use refund::{HttpRefundTransport, RefundFlow, RefundTransport};

/// Convenience alias used throughout the crate.
pub type Result<T, E = RedsysError> = std::result::Result<T, E>;
