//! Logging and tracing initialization.

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Safe to call more than once;
/// later calls leave the existing subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let already_set = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish()).is_err()
    } else {
        tracing::subscriber::set_global_default(builder.finish()).is_err()
    };

    if already_set {
        tracing::debug!("Tracing subscriber already installed, keeping it");
    }
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}
