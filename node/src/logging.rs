//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with configurable format (JSON or
//! pretty-printed) and environment-based filtering via `RUST_LOG`.
//!
//! All log output is written to stderr. `sign` and `verify` print their
//! results as JSON on stdout, so the two streams must stay apart.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "redsys_node=info,redsys_protocol=info,tower_http=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output. Suitable for local development.
    Pretty,
    /// Machine-parseable JSON lines. Suitable for production log aggregation.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Call once, early in `main()`. A second call returns an error instead
/// of replacing the installed subscriber.
///
/// The `RUST_LOG` environment variable overrides `default_directive` when
/// set, e.g.:
///
/// ```text
/// RUST_LOG=redsys_node=debug,redsys_protocol=debug,tower_http=debug
/// ```
pub fn init_logging(default_directive: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .try_init()?;
        }
    }

    tracing::debug!(?format, "logging initialized");
    Ok(())
}
