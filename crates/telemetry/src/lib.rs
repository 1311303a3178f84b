//! Structured logging initialization.
//!
//! vaultkeeper writes JSON-formatted logs to stdout via `tracing-subscriber`,
//! filtered by `RUST_LOG` (default `info`). No secret values (root tokens,
//! key shares, passwords, app-role secret-ids) are ever passed to a log
//! field — only names, paths, and booleans.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install global tracing subscriber: {0}")]
    Init(String),
}

/// Initialize the global `tracing` subscriber. Must be called exactly once,
/// at process start, before any other component logs.
pub fn init_telemetry() -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_target(true))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}
