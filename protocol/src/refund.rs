//! # Refunds
//!
//! The only synchronous conversation we have with the gateway. A refund is
//! an ordinary signed envelope (transaction type `3`) POSTed as JSON to the
//! REST endpoint. The reply is either:
//!
//! - an explicit error, `{"errorCode": "SIS0059", "errorCodeDescription": ...}`, or
//! - another signed envelope, signed for the same order, whose `Ds_Response`
//!   says whether the refund went through (`0400` or `0900`) or not.
//!
//! There is no retry here. A timeout on the transport is the caller's
//! decision; see [`HttpRefundTransport::with_timeout`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::crypto::keys::SharedSecret;
use crate::envelope::response::decode;
use crate::envelope::{DecodedResponse, RefundRequest, SignedEnvelope};
use crate::error::RedsysError;

/// `Ds_Response` values that mean the refund was accepted.
pub const REFUND_SUCCESS_CODES: &[&str] = &["0400", "0900"];

/// Reply field carrying an explicit gateway error.
pub const ERROR_CODE_FIELD: &str = "errorCode";

/// Reply field carrying the description of that error.
pub const ERROR_DESCRIPTION_FIELD: &str = "errorCodeDescription";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sends an envelope to the REST endpoint and returns the raw reply body.
///
/// A body carrying [`ERROR_CODE_FIELD`] is a gateway reply whatever the
/// HTTP status, and must be handed back rather than turned into
/// [`RedsysError::Transport`].
#[async_trait]
pub trait RefundTransport: Send + Sync {
    async fn post_envelope(&self, url: &str, envelope: &SignedEnvelope)
        -> Result<String, RedsysError>;
}

/// [`RefundTransport`] over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpRefundTransport {
    client: reqwest::Client,
}

impl HttpRefundTransport {
    /// No timeout. The call waits as long as the gateway does.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, RedsysError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RedsysError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RefundTransport for HttpRefundTransport {
    async fn post_envelope(
        &self,
        url: &str,
        envelope: &SignedEnvelope,
    ) -> Result<String, RedsysError> {
        let response = self
            .client
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RedsysError::Transport(format!("refund request timed out: {}", e))
                } else {
                    RedsysError::Transport(format!("refund request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RedsysError::Transport(format!("failed to read refund reply: {}", e)))?;

        if !status.is_success() {
            if carries_gateway_error(&body) {
                debug!(status = status.as_u16(), "gateway error reply on non-2xx status");
                return Ok(body);
            }
            return Err(RedsysError::Transport(format!(
                "refund endpoint answered HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// One refund round trip: encode, POST, parse, authenticate, judge.
pub struct RefundFlow<'a, T: RefundTransport + ?Sized> {
    secret: &'a SharedSecret,
    signature_version: &'a str,
    rest_url: String,
    transport: &'a T,
}

impl<'a, T: RefundTransport + ?Sized> RefundFlow<'a, T> {
    pub fn new(
        secret: &'a SharedSecret,
        signature_version: &'a str,
        rest_url: impl Into<String>,
        transport: &'a T,
    ) -> Self {
        Self {
            secret,
            signature_version,
            rest_url: rest_url.into(),
            transport,
        }
    }

    /// Execute `request`. Returns the refunded amount on success.
    ///
    /// # Errors
    ///
    /// - [`RedsysError::GatewayError`] when the reply carries `errorCode`.
    /// - [`RedsysError::SignatureMismatch`] when the reply does not
    ///   authenticate for this order.
    /// - [`RedsysError::RefundRejected`] for any `Ds_Response` other than
    ///   `0400` or `0900`.
    /// - [`RedsysError::Transport`] when the HTTP exchange fails and the
    ///   body is not a gateway error reply.
    pub async fn execute(&self, request: &RefundRequest) -> Result<Amount, RedsysError> {
        let envelope = request.encode(self.secret, self.signature_version)?;
        info!(
            order = %request.order,
            amount = %request.amount,
            url = %self.rest_url,
            "requesting refund"
        );

        let body = self.transport.post_envelope(&self.rest_url, &envelope).await?;
        let reply = parse_reply(&body, request.order.as_str(), self.secret)?;

        let code = reply.raw_response_code();
        if REFUND_SUCCESS_CODES.contains(&code) {
            info!(order = %request.order, code, "refund accepted");
            Ok(request.amount)
        } else {
            warn!(order = %request.order, code, "refund rejected");
            Err(RedsysError::RefundRejected {
                code: code.to_string(),
            })
        }
    }
}

/// Interpret a REST reply body for `order`.
pub fn parse_reply(
    body: &str,
    order: &str,
    secret: &SharedSecret,
) -> Result<DecodedResponse, RedsysError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RedsysError::MalformedEnvelope(format!("refund reply is not JSON: {}", e)))?;

    let Value::Object(fields) = &value else {
        return Err(RedsysError::MalformedEnvelope(
            "refund reply is not a JSON object".to_string(),
        ));
    };

    if let Some(code) = fields.get(ERROR_CODE_FIELD) {
        let code = text_of(code);
        let description = fields
            .get(ERROR_DESCRIPTION_FIELD)
            .map(text_of)
            .unwrap_or_default();
        warn!(order, code = %code, description = %description, "gateway returned an error");
        return Err(RedsysError::GatewayError { code, description });
    }

    let envelope: SignedEnvelope = serde_json::from_value(value.clone()).map_err(|e| {
        RedsysError::MalformedEnvelope(format!("refund reply is not an envelope: {}", e))
    })?;
    let decoded = decode(&envelope, order, secret)?;
    debug!(order, code = decoded.raw_response_code(), "refund reply authenticated");
    Ok(decoded)
}

/// Whether `body` is a JSON object with an [`ERROR_CODE_FIELD`].
fn carries_gateway_error(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.as_object().map(|o| o.contains_key(ERROR_CODE_FIELD)))
        .unwrap_or(false)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{encode, MerchantParameters};
    use crate::order::OrderNumber;
    use parking_lot::Mutex;

    const TEST_SECRET: &str = "sq7HjrUOBfKmC576ILgskD5srU870gJ7";

    /// Replays a canned body and remembers what was sent.
    struct ScriptedTransport {
        reply: String,
        sent: Mutex<Vec<(String, SignedEnvelope)>>,
    }

    impl ScriptedTransport {
        fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RefundTransport for ScriptedTransport {
        async fn post_envelope(
            &self,
            url: &str,
            envelope: &SignedEnvelope,
        ) -> Result<String, RedsysError> {
            self.sent.lock().push((url.to_string(), envelope.clone()));
            Ok(self.reply.clone())
        }
    }

    fn secret() -> SharedSecret {
        SharedSecret::new(TEST_SECRET)
    }

    fn request() -> RefundRequest {
        RefundRequest {
            amount: Amount::from_minor_units(1250),
            currency: "978".into(),
            merchant_code: "999008881".into(),
            order: OrderNumber::new("000042").unwrap(),
            terminal: "1".into(),
        }
    }

    fn signed_reply(order: &str, code: &str) -> String {
        let params = MerchantParameters::new()
            .with("Ds_Amount", "1250")
            .with("Ds_Order", order)
            .with("Ds_Response", code)
            .with("Ds_TransactionType", "3");
        let envelope = encode(order, &params, &secret(), "HMAC_SHA256_V1").unwrap();
        serde_json::to_string(&envelope).unwrap()
    }

    #[tokio::test]
    async fn test_refund_accepted() {
        for code in ["0400", "0900"] {
            let transport = ScriptedTransport::new(signed_reply("000042", code));
            let secret = secret();
            let flow = RefundFlow::new(&secret, "HMAC_SHA256_V1", "https://gw/rest", &transport);
            let refunded = flow.execute(&request()).await.unwrap();
            assert_eq!(refunded, Amount::from_minor_units(1250));

            let sent = transport.sent.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "https://gw/rest");
            let params = crate::envelope::response::authenticate(&sent[0].1, "000042", &secret)
                .unwrap();
            assert_eq!(params.get_text("DS_MERCHANT_TRANSACTIONTYPE").as_deref(), Some("3"));
        }
    }

    #[tokio::test]
    async fn test_refund_rejected_code() {
        let transport = ScriptedTransport::new(signed_reply("000042", "0000"));
        let secret = secret();
        let flow = RefundFlow::new(&secret, "HMAC_SHA256_V1", "https://gw/rest", &transport);
        let err = flow.execute(&request()).await.unwrap_err();
        assert!(matches!(err, RedsysError::RefundRejected { code } if code == "0000"));
    }

    #[tokio::test]
    async fn test_refund_gateway_error() {
        let transport = ScriptedTransport::new(
            r#"{"errorCode":"SIS0059","errorCodeDescription":"Error en el número de pedido"}"#,
        );
        let secret = secret();
        let flow = RefundFlow::new(&secret, "HMAC_SHA256_V1", "https://gw/rest", &transport);
        match flow.execute(&request()).await.unwrap_err() {
            RedsysError::GatewayError { code, description } => {
                assert_eq!(code, "SIS0059");
                assert_eq!(description, "Error en el número de pedido");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refund_reply_for_other_order_is_mismatch() {
        let transport = ScriptedTransport::new(signed_reply("000043", "0900"));
        let secret = secret();
        let flow = RefundFlow::new(&secret, "HMAC_SHA256_V1", "https://gw/rest", &transport);
        assert!(matches!(
            flow.execute(&request()).await,
            Err(RedsysError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_parse_reply_rejects_non_envelopes() {
        assert!(matches!(
            parse_reply("not json", "1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            parse_reply("[]", "1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"Ds_Signature":"x"}"#, "1", &secret()),
            Err(RedsysError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_numeric_error_code() {
        let err = parse_reply(r#"{"errorCode":9999}"#, "1", &secret()).unwrap_err();
        assert!(matches!(
            err,
            RedsysError::GatewayError { code, description } if code == "9999" && description.is_empty()
        ));
    }

    #[test]
    fn test_carries_gateway_error() {
        assert!(carries_gateway_error(r#"{"errorCode":"SIS0059","errorCodeDescription":"x"}"#));
        assert!(carries_gateway_error(r#"{"errorCode":9999}"#));
        assert!(!carries_gateway_error("maintenance"));
        assert!(!carries_gateway_error(r#"{"Ds_Signature":"x"}"#));
        assert!(!carries_gateway_error(r#"["errorCode"]"#));
    }
}
