//! Logging bootstrap

use tracing_subscriber::EnvFilter;

use crate::LoggingConfig;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Returns false when
/// a subscriber was already installed, which is not an error.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
