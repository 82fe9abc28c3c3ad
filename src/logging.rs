//! Logging setup using `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Build the event filter. `RUST_LOG` wins over `LOG_LEVEL` when set.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global console subscriber.
pub fn init(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .init();
}
