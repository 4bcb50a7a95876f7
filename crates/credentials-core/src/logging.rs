//! Logging setup for the credentials server

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;
use crate::{Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set and parses.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", settings.level, e)))?,
    };

    let builder = fmt::Subscriber::builder().with_env_filter(filter);

    let installed = if settings.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };

    installed.map_err(|e| Error::Config(format!("Failed to install log subscriber: {}", e)))
}

/// Log a startup banner with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
