//! Logging bootstrap
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level when it is set.

use tracing_subscriber::EnvFilter;

use tether_core::LogLevel;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Filter directive for a configured level
pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber; returns false if one was already set
pub fn init_logging(level: LogLevel, format: LogFormat) -> bool {
    let filter = filter_for(level);
    let result = match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
    };
    result.is_ok()
}
