// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Redsys Gateway Node
//!
//! Entry point for the `redsys-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the payment API.
//!
//! The binary supports four subcommands:
//!
//! - `serve`: run the HTTP service and the metrics endpoint
//! - `sign`: print the signed payment form for an ad-hoc payment
//! - `verify`: authenticate and decode an envelope from the gateway
//! - `version`: print build version information

mod api;
mod cli;
mod ledger;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use redsys_protocol::envelope::decode_notification;
use redsys_protocol::outcome::classify;
use redsys_protocol::{
    Amount, GatewayEndpointSet, HttpRefundTransport, RedsysProvider, SignedEnvelope,
};

use cli::{Commands, RedsysNodeCli};
use metrics::GatewayMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RedsysNodeCli::parse();
    logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.log_format)?;

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Sign(args) => sign_payment(args),
        Commands::Verify(args) => verify_envelope(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs the payment API and the metrics endpoint until SIGINT or SIGTERM.
async fn serve(args: cli::ServeArgs) -> Result<()> {
    let config = args.provider.into_config()?;
    let environment = config.environment;

    let provider = match &args.gateway_url {
        Some(url) => {
            RedsysProvider::with_endpoints(config, GatewayEndpointSet::new(url.as_str()))
        }
        None => RedsysProvider::new(config),
    }
    .context("failed to build provider")?;

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        %environment,
        gateway = provider.endpoints().base(),
        public_url = %args.public_url,
        "starting redsys-node"
    );

    let transport =
        HttpRefundTransport::with_timeout(Duration::from_secs(args.refund_timeout_secs))
            .context("failed to build refund transport")?;
    let gateway_metrics =
        Arc::new(GatewayMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        provider: Arc::new(provider),
        ledger: Arc::new(ledger::PaymentLedger::new(args.public_url.clone())),
        transport: Arc::new(transport),
        metrics: Arc::clone(&gateway_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.listen, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("{}:{}", args.listen, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connections");
        let _ = stop_tx.send(true);
    });

    let api = async {
        axum::serve(api_listener, api_router)
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .await
    };
    let metrics = async {
        axum::serve(metrics_listener, metrics_router)
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .await
    };
    let (api_result, metrics_result) = tokio::join!(api, metrics);
    api_result.context("API server error")?;
    metrics_result.context("metrics server error")?;

    tracing::info!("redsys-node stopped");
    Ok(())
}

/// Prints the order number and signed form for one payment as JSON.
fn sign_payment(args: cli::SignArgs) -> Result<()> {
    let provider = RedsysProvider::new(args.provider.into_config()?)?;
    let total: Amount = args.amount.parse().context("invalid --amount")?;

    let payment = ledger::StoredPayment::new(
        args.payment_id,
        total,
        args.payment_currency,
        args.order_number,
        &args.public_url,
    );
    let order = provider.order_number(&payment)?;
    let form = provider.payment_form(&payment)?;

    let output = serde_json::json!({
        "order": order.as_str(),
        "form": api::FormResponse::from(&form),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Authenticates an envelope for `--order` and prints what it says.
fn verify_envelope(args: cli::VerifyArgs) -> Result<()> {
    let config = args.provider.into_config()?;
    let envelope = SignedEnvelope {
        signature_version: args.signature_version,
        merchant_parameters: args.parameters,
        signature: args.signature,
    };

    let decoded = decode_notification(&envelope, &args.order, &config.shared_secret)
        .context("envelope did not authenticate")?;
    let outcome = classify(&decoded)?;

    let output = serde_json::json!({
        "order": args.order,
        "response_code": decoded.response_code(),
        "transaction_type": decoded.transaction_type().to_string(),
        "outcome": outcome.as_ref().map(|o| o.label()).unwrap_or("no_match"),
        "parameters": decoded.parameters(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("redsys-node {}", env!("CARGO_PKG_VERSION"));
    println!("signature   {}", redsys_protocol::config::SIGNATURE_VERSION);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
