//! Outbound envelopes.
//!
//! Serialize the parameters to compact JSON, base64 the bytes, sign the
//! base64 text. No timestamps, no nonces: encoding the same map for the
//! same order twice yields byte-identical envelopes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use super::MerchantParameters;
use crate::amount::Amount;
use crate::crypto::keys::SharedSecret;
use crate::crypto::signatures::sign_to_base64;
use crate::envelope::{SignedEnvelope, TransactionType};
use crate::error::RedsysError;
use crate::order::OrderNumber;

/// Encode and sign `params` for `order`.
pub fn encode(
    order: &str,
    params: &MerchantParameters,
    secret: &SharedSecret,
    signature_version: &str,
) -> Result<SignedEnvelope, RedsysError> {
    let json = serde_json::to_string(params)
        .map_err(|e| RedsysError::MalformedEnvelope(format!("cannot serialize parameters: {}", e)))?;
    debug!(order, parameters = %json, "encoding merchant parameters");

    let merchant_parameters = STANDARD.encode(json.as_bytes());
    let signature = sign_to_base64(order, &merchant_parameters, secret)?;

    Ok(SignedEnvelope {
        signature_version: signature_version.to_string(),
        merchant_parameters,
        signature,
    })
}

// ---------------------------------------------------------------------------
// Payment request
// ---------------------------------------------------------------------------

/// The field set for a hosted-page payment (transaction type `0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Amount,
    pub order: OrderNumber,
    pub merchant_code: String,
    /// `"TRUE"` or `"FALSE"`.
    pub direct_payment: String,
    /// Numeric currency code.
    pub currency: String,
    pub terminal: String,
    /// Where the gateway posts its server-to-server notification.
    pub merchant_url: String,
    /// Where the customer lands after an authorised payment.
    pub url_ok: String,
    /// Where the customer lands after a failed one.
    pub url_ko: String,
    pub language: String,
}

impl PaymentRequest {
    /// Build the parameter map, in the order the gateway documents it.
    pub fn to_parameters(&self) -> MerchantParameters {
        MerchantParameters::new()
            .with("DS_MERCHANT_AMOUNT", self.amount.to_gateway_string())
            .with("DS_MERCHANT_ORDER", self.order.as_str())
            .with("DS_MERCHANT_MERCHANTCODE", self.merchant_code.as_str())
            .with("DS_MERCHANT_DIRECTPAYMENT", self.direct_payment.as_str())
            .with("DS_MERCHANT_CURRENCY", self.currency.as_str())
            .with(
                "DS_MERCHANT_TRANSACTIONTYPE",
                TransactionType::Payment.code(),
            )
            .with("DS_MERCHANT_TERMINAL", self.terminal.as_str())
            .with("DS_MERCHANT_MERCHANTURL", self.merchant_url.as_str())
            .with("DS_MERCHANT_URLOK", self.url_ok.as_str())
            .with("DS_MERCHANT_URLKO", self.url_ko.as_str())
            .with("Ds_Merchant_ConsumerLanguage", self.language.as_str())
    }

    pub fn encode(
        &self,
        secret: &SharedSecret,
        signature_version: &str,
    ) -> Result<SignedEnvelope, RedsysError> {
        encode(self.order.as_str(), &self.to_parameters(), secret, signature_version)
    }
}

// ---------------------------------------------------------------------------
// Refund request
// ---------------------------------------------------------------------------

/// The field set for an automatic refund (transaction type `3`) sent to
/// the REST endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub amount: Amount,
    pub currency: String,
    pub merchant_code: String,
    pub order: OrderNumber,
    pub terminal: String,
}

impl RefundRequest {
    pub fn to_parameters(&self) -> MerchantParameters {
        MerchantParameters::new()
            .with("DS_MERCHANT_AMOUNT", self.amount.to_gateway_string())
            .with("DS_MERCHANT_CURRENCY", self.currency.as_str())
            .with("DS_MERCHANT_MERCHANTCODE", self.merchant_code.as_str())
            .with("DS_MERCHANT_ORDER", self.order.as_str())
            .with("DS_MERCHANT_TERMINAL", self.terminal.as_str())
            .with(
                "DS_MERCHANT_TRANSACTIONTYPE",
                TransactionType::Refund.code(),
            )
    }

    pub fn encode(
        &self,
        secret: &SharedSecret,
        signature_version: &str,
    ) -> Result<SignedEnvelope, RedsysError> {
        encode(self.order.as_str(), &self.to_parameters(), secret, signature_version)
    }
}
