//! Tracing subscriber setup. `RUST_LOG` wins over `LOG_LEVEL` when both are set.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber. Safe to call once at startup.
pub fn init_tracing() {
    let config = LoggingConfig::from_env().unwrap_or_else(|_| LoggingConfig {
        level: "INFO".to_string(),
        format: LogFormat::Plain,
    });

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .init();
        }
        LogFormat::Plain => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}
