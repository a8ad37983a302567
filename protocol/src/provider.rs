//! # Provider
//!
//! [`RedsysProvider`] is what a merchant application actually holds. It
//! owns one validated [`ProviderConfig`] and offers the three operations a
//! payment integration needs:
//!
//! 1. [`payment_form`](RedsysProvider::payment_form): the signed hidden
//!    fields the customer's browser posts to the hosted payment page.
//! 2. [`process_notification`](RedsysProvider::process_notification):
//!    authenticate what the gateway sent back, classify it, update the
//!    payment record and say where to redirect.
//! 3. [`refund`](RedsysProvider::refund): the synchronous REST refund.
//!
//! The provider is immutable after construction and `Sync`, so one
//! instance serves every request concurrently.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::config::{currency_code, GatewayEndpointSet, ProviderConfig};
use crate::envelope::response::decode_notification;
use crate::envelope::{PaymentRequest, RefundRequest, SignedEnvelope};
use crate::error::RedsysError;
use crate::order::{OrderNumber, OrderNumberPolicy};
use crate::outcome::{classify, PaymentOutcome, PaymentRecord};
use crate::refund::{RefundFlow, RefundTransport};

/// Everything needed to render the auto-submitting payment form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentForm {
    /// Form `action`: the gateway's payment page.
    pub action: String,
    /// Always `"post"`.
    pub method: &'static str,
    pub envelope: SignedEnvelope,
}

impl PaymentForm {
    /// Hidden input `(name, value)` pairs.
    pub fn fields(&self) -> [(&'static str, &str); 3] {
        self.envelope.form_fields()
    }
}

/// What happened to a notification, and where the customer goes next.
#[derive(Debug)]
pub enum NotificationDisposition {
    /// Authenticated and classified. Any status update has been applied.
    Classified {
        outcome: PaymentOutcome,
        redirect_to: String,
    },
    /// Authenticated, but the response code matches no rule (code 100).
    /// The record was not touched.
    NoMatch {
        response_code: i64,
        redirect_to: String,
    },
    /// Refused before classification. The record was not touched.
    Discarded {
        error: RedsysError,
        redirect_to: String,
    },
}

impl NotificationDisposition {
    pub fn redirect_to(&self) -> &str {
        match self {
            Self::Classified { redirect_to, .. }
            | Self::NoMatch { redirect_to, .. }
            | Self::Discarded { redirect_to, .. } => redirect_to,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Classified { outcome, .. } if outcome.is_success())
    }

    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Classified { outcome, .. } => outcome.label(),
            Self::NoMatch { .. } => "no_match",
            Self::Discarded {
                error: RedsysError::SignatureMismatch,
                ..
            } => "signature_mismatch",
            Self::Discarded { .. } => "discarded",
        }
    }
}

/// The configured gateway integration.
#[derive(Debug, Clone)]
pub struct RedsysProvider {
    config: ProviderConfig,
    endpoints: GatewayEndpointSet,
    policy: OrderNumberPolicy,
}

impl RedsysProvider {
    /// Validate `config` and build a provider for its environment.
    pub fn new(config: ProviderConfig) -> Result<Self, RedsysError> {
        let endpoints = config.environment.endpoints();
        Self::with_endpoints(config, endpoints)
    }

    /// Like [`new`](Self::new), but talk to `endpoints` instead of the
    /// environment's. Useful against a local stand-in for the gateway.
    pub fn with_endpoints(
        config: ProviderConfig,
        endpoints: GatewayEndpointSet,
    ) -> Result<Self, RedsysError> {
        config.validate()?;
        let policy = OrderNumberPolicy::new(
            config.order_number_prefix.clone(),
            config.order_number_min_length,
        );
        Ok(Self {
            config,
            endpoints,
            policy,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &GatewayEndpointSet {
        &self.endpoints
    }

    /// Numeric currency for `payment`: its own, else the provider default.
    pub fn currency_code<P: PaymentRecord + ?Sized>(&self, payment: &P) -> String {
        let currency = payment
            .currency()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.currency.clone());
        currency_code(&currency)
    }

    pub fn order_number<P: PaymentRecord + ?Sized>(
        &self,
        payment: &P,
    ) -> Result<OrderNumber, RedsysError> {
        let explicit = payment.order_number();
        self.policy
            .order_number_for(&payment.payment_id(), explicit.as_deref())
    }

    /// Sign the hosted-page payment request for `payment`.
    pub fn payment_form<P: PaymentRecord + ?Sized>(
        &self,
        payment: &P,
    ) -> Result<PaymentForm, RedsysError> {
        let order = self.order_number(payment)?;
        let (url_ok, url_ko) = if self.config.process_on_redirect {
            (payment.process_url(), payment.process_url())
        } else {
            (payment.success_url(), payment.failure_url())
        };

        let request = PaymentRequest {
            amount: payment.total(),
            order,
            merchant_code: self.config.merchant_code.clone(),
            direct_payment: self.config.direct_payment_flag().to_string(),
            currency: self.currency_code(payment),
            terminal: self.config.terminal.clone(),
            merchant_url: payment.process_url(),
            url_ok,
            url_ko,
            language: self.config.language.clone(),
        };
        debug!(
            order = %request.order,
            amount = %request.amount,
            currency = %request.currency,
            "building payment form"
        );

        let envelope = request.encode(&self.config.shared_secret, &self.config.signature_version)?;
        Ok(PaymentForm {
            action: self.endpoints.form_url(),
            method: "post",
            envelope,
        })
    }

    /// Handle a notification (server-to-server POST or browser redirect)
    /// for `payment`.
    ///
    /// `fields` are the raw form fields, from the query string or body.
    /// The record is mutated only when the envelope authenticated and the
    /// outcome carries a status update.
    pub fn process_notification<'f, P, I>(
        &self,
        payment: &mut P,
        fields: I,
    ) -> NotificationDisposition
    where
        P: PaymentRecord + ?Sized,
        I: IntoIterator<Item = (&'f str, &'f str)>,
    {
        let payment_id = payment.payment_id();
        info!(payment = %payment_id, "processing gateway response");

        let decoded = SignedEnvelope::from_form_fields(fields).and_then(|envelope| {
            let order = self.order_number(&*payment)?;
            decode_notification(&envelope, order.as_str(), &self.config.shared_secret)
        });
        let classified = decoded.and_then(|decoded| {
            classify(&decoded).map(|outcome| (outcome, decoded))
        });

        match classified {
            Ok((Some(outcome), decoded)) => {
                if let Some(update) = outcome.status_update(decoded.parameters()) {
                    info!(payment = %payment_id, status = %update.status, "applying gateway outcome");
                    payment.apply_outcome(update);
                }
                let redirect_to = if outcome.is_success() {
                    payment.success_url()
                } else {
                    payment.failure_url()
                };
                NotificationDisposition::Classified {
                    outcome,
                    redirect_to,
                }
            }
            Ok((None, decoded)) => {
                warn!(
                    payment = %payment_id,
                    code = decoded.response_code(),
                    "response code matches no classification rule"
                );
                NotificationDisposition::NoMatch {
                    response_code: decoded.response_code(),
                    redirect_to: payment.failure_url(),
                }
            }
            Err(error) => {
                warn!(payment = %payment_id, %error, "discarding gateway response");
                NotificationDisposition::Discarded {
                    error,
                    redirect_to: payment.failure_url(),
                }
            }
        }
    }

    /// Refund `amount` of `payment`. `None` or zero means everything captured.
    ///
    /// The record is not changed here. The gateway confirms refunds with
    /// its own notification, which goes through
    /// [`process_notification`](Self::process_notification).
    pub async fn refund<P, T>(
        &self,
        payment: &P,
        amount: Option<Amount>,
        transport: &T,
    ) -> Result<Amount, RedsysError>
    where
        P: PaymentRecord + ?Sized,
        T: RefundTransport + ?Sized,
    {
        let amount = amount
            .filter(|a| !a.is_zero())
            .unwrap_or_else(|| payment.captured_amount());
        if amount.is_zero() {
            return Err(RedsysError::NothingToRefund);
        }

        let request = RefundRequest {
            amount,
            currency: self.currency_code(payment),
            merchant_code: self.config.merchant_code.clone(),
            order: self.order_number(payment)?,
            terminal: self.config.terminal.clone(),
        };

        RefundFlow::new(
            &self.config.shared_secret,
            &self.config.signature_version,
            self.endpoints.rest_url(),
            transport,
        )
        .execute(&request)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, ProviderConfigBuilder};
    use crate::crypto::SharedSecret;
    use crate::envelope::{decode, encode, MerchantParameters};
    use crate::outcome::{PaymentStatus, StatusUpdate};

    const TEST_SECRET: &str = "sq7HjrUOBfKmC576ILgskD5srU870gJ7";

    #[derive(Debug, Default)]
    struct Payment {
        id: u64,
        order_number: Option<String>,
        total: Amount,
        currency: Option<String>,
        captured: Amount,
        updates: Vec<StatusUpdate>,
    }

    impl PaymentRecord for Payment {
        fn payment_id(&self) -> String {
            self.id.to_string()
        }
        fn order_number(&self) -> Option<String> {
            self.order_number.clone()
        }
        fn total(&self) -> Amount {
            self.total
        }
        fn currency(&self) -> Option<String> {
            self.currency.clone()
        }
        fn captured_amount(&self) -> Amount {
            self.captured
        }
        fn process_url(&self) -> String {
            format!("https://shop.example/payments/{}/process", self.id)
        }
        fn success_url(&self) -> String {
            format!("https://shop.example/payments/{}/success", self.id)
        }
        fn failure_url(&self) -> String {
            format!("https://shop.example/payments/{}/failure", self.id)
        }
        fn apply_outcome(&mut self, update: StatusUpdate) {
            if let Some(captured) = update.captured_amount {
                self.captured = captured;
            }
            self.updates.push(update);
        }
    }

    fn secret() -> SharedSecret {
        SharedSecret::new(TEST_SECRET)
    }

    fn provider() -> RedsysProvider {
        provider_with(|b| b)
    }

    fn provider_with(
        f: impl FnOnce(ProviderConfigBuilder) -> ProviderConfigBuilder,
    ) -> RedsysProvider {
        let config = f(ProviderConfig::builder()
            .language("002")
            .merchant_code("999008881")
            .terminal("1")
            .shared_secret(TEST_SECRET)
            .order_number_prefix("TEST"))
        .build()
        .unwrap();
        RedsysProvider::new(config).unwrap()
    }

    fn payment() -> Payment {
        Payment {
            id: 42,
            total: Amount::from_minor_units(5000),
            currency: Some("EUR".into()),
            ..Default::default()
        }
    }

    fn notification(order: &str, code: &str, transaction_type: &str) -> SignedEnvelope {
        let params = MerchantParameters::new()
            .with("Ds_Amount", "5000")
            .with("Ds_Currency", "978")
            .with("Ds_Order", order)
            .with("Ds_Response", code)
            .with("Ds_TransactionType", transaction_type)
            .with("Ds_AuthorisationCode", "482913");
        encode(order, &params, &secret(), "HMAC_SHA256_V1").unwrap()
    }

    #[test]
    fn test_invalid_config_refused() {
        let mut config = provider().config().clone();
        config.terminal = String::new();
        assert!(matches!(
            RedsysProvider::new(config),
            Err(RedsysError::Config(_))
        ));
    }

    #[test]
    fn test_endpoints_follow_environment() {
        assert_eq!(
            provider().endpoints().form_url(),
            "https://sis-t.redsys.es:25443/sis/realizarPago"
        );
        let real = provider_with(|b| b.environment(Environment::Real));
        assert_eq!(
            real.endpoints().rest_url(),
            "https://sis.redsys.es/sis/rest/trataPeticionREST"
        );
    }

    #[test]
    fn test_currency_code_resolution() {
        let provider = provider_with(|b| b.currency("GBP"));
        assert_eq!(provider.currency_code(&payment()), "978");
        let mut p = payment();
        p.currency = None;
        assert_eq!(provider.currency_code(&p), "826");
    }

    #[test]
    fn test_order_number_from_policy() {
        let provider = provider();
        assert_eq!(provider.order_number(&payment()).unwrap().as_str(), "TEST42");
        let mut p = payment();
        p.order_number = Some("ABC123".into());
        assert_eq!(provider.order_number(&p).unwrap().as_str(), "ABC123");
    }

    #[test]
    fn test_payment_form_contents() {
        let provider = provider();
        let form = provider.payment_form(&payment()).unwrap();
        assert_eq!(form.action, "https://sis-t.redsys.es:25443/sis/realizarPago");
        assert_eq!(form.method, "post");
        assert_eq!(form.fields()[0], ("Ds_SignatureVersion", "HMAC_SHA256_V1"));

        let params = crate::envelope::response::authenticate(
            &form.envelope,
            "TEST42",
            &secret(),
        )
        .unwrap();
        assert_eq!(params.get_text("DS_MERCHANT_AMOUNT").as_deref(), Some("5000"));
        assert_eq!(params.get_text("DS_MERCHANT_ORDER").as_deref(), Some("TEST42"));
        assert_eq!(params.get_text("DS_MERCHANT_CURRENCY").as_deref(), Some("978"));
        assert_eq!(params.get_text("DS_MERCHANT_DIRECTPAYMENT").as_deref(), Some("FALSE"));
        assert_eq!(
            params.get_text("DS_MERCHANT_URLOK").as_deref(),
            Some("https://shop.example/payments/42/success")
        );
        assert_eq!(
            params.get_text("DS_MERCHANT_MERCHANTURL").as_deref(),
            Some("https://shop.example/payments/42/process")
        );
        assert_eq!(
            params.get_text("Ds_Merchant_ConsumerLanguage").as_deref(),
            Some("002")
        );
    }

    #[test]
    fn test_process_on_redirect_points_back_to_us() {
        let provider = provider_with(|b| b.process_on_redirect(true).direct_payment(true));
        let form = provider.payment_form(&payment()).unwrap();
        let params = crate::envelope::response::authenticate(
            &form.envelope,
            "TEST42",
            &secret(),
        )
        .unwrap();
        let process = Some("https://shop.example/payments/42/process".to_string());
        assert_eq!(params.get_text("DS_MERCHANT_URLOK"), process);
        assert_eq!(params.get_text("DS_MERCHANT_URLKO"), process);
        assert_eq!(params.get_text("DS_MERCHANT_DIRECTPAYMENT").as_deref(), Some("TRUE"));
    }

    #[test]
    fn test_notification_confirms_payment() {
        let provider = provider();
        let mut payment = payment();
        let envelope = notification("TEST42", "0000", "0");

        let disposition = provider.process_notification(&mut payment, envelope.form_fields());
        assert!(disposition.is_success());
        assert_eq!(disposition.redirect_to(), "https://shop.example/payments/42/success");
        assert_eq!(disposition.label(), "authorized_payment");

        assert_eq!(payment.updates.len(), 1);
        let update = &payment.updates[0];
        assert_eq!(update.status, PaymentStatus::Confirmed);
        assert_eq!(update.transaction_id.as_deref(), Some("482913"));
        assert_eq!(payment.captured, Amount::from_minor_units(5000));
        assert_eq!(update.extra_data.get_text("Ds_Order").as_deref(), Some("TEST42"));
    }

    #[test]
    fn test_notification_rejection() {
        let provider = provider();
        let mut payment = payment();
        let envelope = notification("TEST42", "0180", "0");

        let disposition = provider.process_notification(&mut payment, envelope.form_fields());
        assert!(!disposition.is_success());
        assert_eq!(disposition.redirect_to(), "https://shop.example/payments/42/failure");
        assert_eq!(payment.updates[0].status, PaymentStatus::Rejected);
        assert_eq!(payment.updates[0].message.as_deref(), Some("Ds_Response was 180"));
    }

    #[test]
    fn test_unrecognized_redirects_to_success_without_mutation() {
        let provider = provider();
        let mut payment = payment();
        let envelope = notification("TEST42", "0900", "9");

        let disposition = provider.process_notification(&mut payment, envelope.form_fields());
        assert!(disposition.is_success());
        assert!(payment.updates.is_empty());
    }

    #[test]
    fn test_code_100_leaves_record_alone() {
        let provider = provider();
        let mut payment = payment();
        let envelope = notification("TEST42", "0100", "0");

        let disposition = provider.process_notification(&mut payment, envelope.form_fields());
        assert!(matches!(
            disposition,
            NotificationDisposition::NoMatch {
                response_code: 100,
                ..
            }
        ));
        assert_eq!(disposition.redirect_to(), "https://shop.example/payments/42/failure");
        assert!(payment.updates.is_empty());
    }

    #[test]
    fn test_forged_notification_discarded() {
        let provider = provider();
        let mut payment = payment();
        // Signed for somebody else's order.
        let envelope = notification("TEST43", "0000", "0");

        let disposition = provider.process_notification(&mut payment, envelope.form_fields());
        assert!(matches!(
            disposition,
            NotificationDisposition::Discarded {
                error: RedsysError::SignatureMismatch,
                ..
            }
        ));
        assert_eq!(disposition.label(), "signature_mismatch");
        assert_eq!(disposition.redirect_to(), "https://shop.example/payments/42/failure");
        assert!(payment.updates.is_empty());
        assert_eq!(payment.captured, Amount::ZERO);
    }

    #[test]
    fn test_incomplete_form_discarded() {
        let provider = provider();
        let mut payment = payment();
        let disposition =
            provider.process_notification(&mut payment, [("Ds_Signature", "abc")]);
        assert!(matches!(
            disposition,
            NotificationDisposition::Discarded {
                error: RedsysError::MissingRequiredField(_),
                ..
            }
        ));
        assert!(payment.updates.is_empty());
    }

    #[test]
    fn test_notification_envelope_decodes_for_provider_order() {
        let envelope = notification("TEST42", "0000", "0");
        let decoded = decode(&envelope, "TEST42", &secret()).unwrap();
        assert_eq!(decoded.response_code(), 0);
    }

    #[tokio::test]
    async fn test_refund_nothing_captured() {
        let provider = provider();
        let transport = crate::refund::HttpRefundTransport::new();
        let err = provider.refund(&payment(), None, &transport).await.unwrap_err();
        assert!(matches!(err, RedsysError::NothingToRefund));
    }

    /// Answers every refund with an accepted reply and keeps what was sent.
    struct AcceptingTransport {
        order: String,
        sent: parking_lot::Mutex<Vec<SignedEnvelope>>,
    }

    #[async_trait::async_trait]
    impl RefundTransport for AcceptingTransport {
        async fn post_envelope(
            &self,
            _url: &str,
            envelope: &SignedEnvelope,
        ) -> Result<String, RedsysError> {
            self.sent.lock().push(envelope.clone());
            let params = MerchantParameters::new()
                .with("Ds_Order", self.order.as_str())
                .with("Ds_Response", "0900")
                .with("Ds_TransactionType", "3");
            let reply = encode(&self.order, &params, &secret(), "HMAC_SHA256_V1")?;
            serde_json::to_string(&reply).map_err(|e| RedsysError::Transport(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_zero_refund_amount_means_captured() {
        let provider = provider();
        let mut payment = payment();
        payment.captured = Amount::from_minor_units(5000);
        let transport = AcceptingTransport {
            order: provider.order_number(&payment).unwrap().as_str().to_string(),
            sent: parking_lot::Mutex::new(Vec::new()),
        };

        let refunded = provider
            .refund(&payment, Some(Amount::ZERO), &transport)
            .await
            .unwrap();
        assert_eq!(refunded, Amount::from_minor_units(5000));

        let sent = transport.sent.lock();
        let params =
            crate::envelope::response::authenticate(&sent[0], &transport.order, &secret()).unwrap();
        assert_eq!(params.get_text("DS_MERCHANT_AMOUNT").as_deref(), Some("5000"));
    }
}
