//! Structured logging infrastructure for Muster.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system with human-readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use muster_core::logging;
///
/// logging::init();
/// tracing::info!("Gateway started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// # Example
/// ```no_run
/// use muster_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "muster-gateway", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Pick the output format from configuration
pub fn init_from_config(config: &crate::config::LoggingConfig) {
    if config.json {
        init_json();
    } else {
        init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_builds() {
        // The global subscriber can only be installed once per process
        let _ = env_filter();
    }
}
