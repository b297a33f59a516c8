//! Tracing setup.
//!
//! The subscriber is installed before the configuration is read so that
//! loading errors are logged. Once `logging.level` is known the filter is
//! swapped through a reload handle. `RUST_LOG`, when set, always wins.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Installs the global subscriber at `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    if tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switches the filter to the configured level.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::debug!(configured = level, "RUST_LOG is set; keeping its filter");
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    match handle.reload(EnvFilter::new(level)) {
        Ok(()) => tracing::debug!(level, "Log level applied"),
        Err(e) => tracing::warn!(error = %e, level, "Failed to apply log level"),
    }
}

/// Emits the final shutdown line.
pub fn shutdown_tracing() {
    tracing::info!("Server stopped");
}
