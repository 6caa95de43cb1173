//! Logging initialisation
//!
//! `RUST_LOG` takes precedence; otherwise the configured level is used.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Build the filter used by [`init_logging`]
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Install the global fmt subscriber.
///
/// Returns `false` when a subscriber was already installed, which happens
/// when several tests or embedders initialise logging in one process.
pub fn init_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(false)
        .try_init()
        .is_ok()
}
