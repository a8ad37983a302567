//! # Payment API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method   | Path                      | Description                          |
//! |----------|---------------------------|--------------------------------------|
//! | GET      | `/health`                 | Liveness probe                       |
//! | POST     | `/payments`               | Create a payment                     |
//! | GET      | `/payments/:id`           | Payment state                        |
//! | GET      | `/payments/:id/form`      | Signed hidden fields for the gateway |
//! | GET/POST | `/payments/:id/process`   | Gateway notification or redirect     |
//! | POST     | `/payments/:id/refund`    | Refund through the REST endpoint     |
//! | GET      | `/payments/:id/success`   | Landing page after authorisation     |
//! | GET      | `/payments/:id/failure`   | Landing page after rejection         |

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, RawQuery, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use redsys_protocol::{
    Amount, MerchantParameters, OrderNumber, PaymentForm, PaymentStatus, RedsysError,
    RedsysProvider, RefundTransport,
};

use crate::ledger::{PaymentLedger, StoredPayment};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<RedsysProvider>,
    pub ledger: Arc<PaymentLedger>,
    /// Carries refund envelopes to the gateway's REST endpoint.
    pub transport: Arc<dyn RefundTransport>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/payments", post(create_payment_handler))
        .route("/payments/:id", get(payment_handler))
        .route("/payments/:id/form", get(form_handler))
        .route(
            "/payments/:id/process",
            get(process_handler).post(process_handler),
        )
        .route("/payments/:id/refund", post(refund_handler))
        .route("/payments/:id/success", get(success_handler))
        .route("/payments/:id/failure", get(failure_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /payments`.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Decimal amount in major units, e.g. `"49.95"`.
    pub total: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
}

/// Body of `POST /payments/:id/refund`.
#[derive(Debug, Default, Deserialize)]
pub struct RefundPaymentRequest {
    /// Decimal amount; defaults to everything captured.
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: u64,
    pub order_number: Option<String>,
    pub status: PaymentStatus,
    pub total: String,
    pub captured_amount: String,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
    /// Last authenticated gateway response, verbatim.
    pub gateway_response: Option<MerchantParameters>,
    pub created_at: String,
    pub modified_at: String,
}

impl From<&StoredPayment> for PaymentResponse {
    fn from(p: &StoredPayment) -> Self {
        Self {
            id: p.id,
            order_number: p.order_number.clone(),
            status: p.status,
            total: p.total.to_string(),
            captured_amount: p.captured_amount.to_string(),
            currency: p.currency.clone(),
            transaction_id: p.transaction_id.clone(),
            message: p.message.clone(),
            gateway_response: p.extra_data.clone(),
            created_at: p.created_at.to_rfc3339(),
            modified_at: p.modified_at.to_rfc3339(),
        }
    }
}

/// Hidden-field form the customer's browser posts to the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct FormResponse {
    pub action: String,
    pub method: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl From<&PaymentForm> for FormResponse {
    fn from(form: &PaymentForm) -> Self {
        Self {
            action: form.action.clone(),
            method: form.method.to_string(),
            fields: form
                .fields()
                .iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::from(*value)))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefundResponse {
    pub payment: u64,
    pub refunded: String,
}

/// Landing page payload for `/success` and `/failure`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LandingResponse {
    pub payment: u64,
    pub result: String,
    pub status: PaymentStatus,
    pub message: Option<String>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Gateway or response code, when the failure carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: None,
        }),
    )
        .into_response()
}

fn not_found(id: u64) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("payment {} not found", id))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "environment": state.provider.config().environment,
            "payments": state.ledger.count(),
        })),
    )
}

/// `POST /payments`: validate and store a new `waiting` payment.
async fn create_payment_handler(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> Response {
    let total: Amount = match req.total.parse() {
        Ok(total) => total,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let order_number = match req.order_number.filter(|o| !o.is_empty()) {
        Some(order) => match OrderNumber::new(order) {
            Ok(order) => Some(order.as_str().to_string()),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        },
        None => None,
    };

    let payment = state
        .ledger
        .create(total, req.currency.filter(|c| !c.is_empty()), order_number);
    state.metrics.payments_created_total.inc();
    info!(payment = payment.id, total = %payment.total, "payment created");

    (StatusCode::CREATED, Json(PaymentResponse::from(&payment))).into_response()
}

/// `GET /payments/:id`
async fn payment_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    match state.ledger.get(id) {
        Some(payment) => Json(PaymentResponse::from(&payment)).into_response(),
        None => not_found(id),
    }
}

/// `GET /payments/:id/form`: sign the payment request for the hosted page.
async fn form_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    let Some(payment) = state.ledger.get(id) else {
        return not_found(id);
    };

    match state.provider.payment_form(&payment) {
        Ok(form) => Json(FormResponse::from(&form)).into_response(),
        Err(e) => {
            warn!(payment = id, error = %e, "cannot build payment form");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

/// `GET|POST /payments/:id/process`
///
/// The gateway posts its server-to-server notification here, and the
/// customer's browser may land here with the same fields in the query
/// string. Either way the answer is a 303 to the success or failure page.
async fn process_handler(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let raw = if body.trim().is_empty() {
        query.unwrap_or_default()
    } else {
        body
    };
    let fields: Vec<(String, String)> = serde_urlencoded::from_str(&raw).unwrap_or_else(|e| {
        warn!(payment = id, error = %e, "unparseable notification form");
        Vec::new()
    });

    let disposition = state.ledger.update(id, |payment| {
        state.provider.process_notification(
            payment,
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    });
    let Some(disposition) = disposition else {
        return not_found(id);
    };

    let label = disposition.label();
    state
        .metrics
        .notifications_total
        .with_label_values(&[label])
        .inc();
    if label == "signature_mismatch" {
        state.metrics.signature_failures_total.inc();
    }

    Redirect::to(disposition.redirect_to()).into_response()
}

/// `POST /payments/:id/refund`
///
/// The record is left untouched; the gateway's own refund notification
/// moves it to `refunded`.
async fn refund_handler(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(req): Json<RefundPaymentRequest>,
) -> Response {
    let Some(payment) = state.ledger.get(id) else {
        return not_found(id);
    };

    let amount = match req.amount.as_deref().map(str::parse::<Amount>).transpose() {
        Ok(amount) => amount,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let started = Instant::now();
    let result = state
        .provider
        .refund(&payment, amount, state.transport.as_ref())
        .await;
    state
        .metrics
        .refund_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    let (label, response) = match result {
        Ok(refunded) => (
            "success",
            Json(RefundResponse {
                payment: id,
                refunded: refunded.to_string(),
            })
            .into_response(),
        ),
        Err(e) => {
            warn!(payment = id, error = %e, "refund failed");
            refund_error(&e)
        }
    };
    state.metrics.refunds_total.with_label_values(&[label]).inc();
    response
}

fn refund_error(error: &RedsysError) -> (&'static str, Response) {
    let (label, status, code) = match error {
        RedsysError::NothingToRefund => ("nothing_to_refund", StatusCode::CONFLICT, None),
        RedsysError::GatewayError { code, .. } => {
            ("gateway_error", StatusCode::BAD_GATEWAY, Some(code.clone()))
        }
        RedsysError::RefundRejected { code } => (
            "rejected",
            StatusCode::UNPROCESSABLE_ENTITY,
            Some(code.clone()),
        ),
        RedsysError::Transport(_) => ("transport_error", StatusCode::BAD_GATEWAY, None),
        RedsysError::SignatureMismatch | RedsysError::MalformedEnvelope(_) => {
            ("bad_reply", StatusCode::BAD_GATEWAY, None)
        }
        _ => ("error", StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    let body = ErrorResponse {
        error: error.to_string(),
        code,
    };
    (label, (status, Json(body)).into_response())
}

async fn success_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    landing(&state, id, "success")
}

async fn failure_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    landing(&state, id, "failure")
}

fn landing(state: &AppState, id: u64, result: &str) -> Response {
    match state.ledger.get(id) {
        Some(payment) => Json(LandingResponse {
            payment: id,
            result: result.to_string(),
            status: payment.status,
            message: payment.message,
        })
        .into_response(),
        None => not_found(id),
    }
}
