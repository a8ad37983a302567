//! # Prometheus Metrics
//!
//! Operational metrics for the gateway node, scraped at `/metrics` on the
//! dedicated metrics port. Everything lives in a private
//! [`prometheus::Registry`] with the `redsys` prefix.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metric handles shared by the request handlers.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Gateway notifications processed, by disposition label.
    pub notifications_total: IntCounterVec,
    /// Notifications whose signature did not authenticate.
    pub signature_failures_total: IntCounter,
    /// Refund attempts, by result.
    pub refunds_total: IntCounterVec,
    /// Wall-clock time of the refund round trip to the gateway.
    pub refund_latency_seconds: Histogram,
    pub payments_created_total: IntCounter,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("redsys".into()), None)?;

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "notifications_total",
                "Gateway notifications processed, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let signature_failures_total = IntCounter::new(
            "signature_failures_total",
            "Gateway notifications rejected for a bad signature",
        )?;
        registry.register(Box::new(signature_failures_total.clone()))?;

        let refunds_total = IntCounterVec::new(
            Opts::new("refunds_total", "Refund attempts, by result"),
            &["result"],
        )?;
        registry.register(Box::new(refunds_total.clone()))?;

        let refund_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "refund_latency_seconds",
                "Round-trip latency of refund calls to the gateway in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(refund_latency_seconds.clone()))?;

        let payments_created_total =
            IntCounter::new("payments_created_total", "Payments created through the API")?;
        registry.register(Box::new(payments_created_total.clone()))?;

        Ok(Self {
            registry,
            notifications_total,
            signature_failures_total,
            refunds_total,
            refund_latency_seconds,
            payments_created_total,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<GatewayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_prefix() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.payments_created_total.inc();
        metrics
            .notifications_total
            .with_label_values(&["authorized_payment"])
            .inc();
        metrics.refund_latency_seconds.observe(0.2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("redsys_payments_created_total 1"));
        assert!(text.contains("redsys_notifications_total{outcome=\"authorized_payment\"} 1"));
        assert!(text.contains("redsys_refund_latency_seconds_count 1"));
    }

    #[test]
    fn test_unlabelled_vectors_stay_silent() {
        let metrics = GatewayMetrics::new().unwrap();
        let text = metrics.encode().unwrap();
        assert!(!text.contains("redsys_refunds_total{"));
        assert!(text.contains("redsys_signature_failures_total 0"));
    }
}
