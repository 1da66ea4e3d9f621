//! Logging system setup.
//!
//! Structured logging via the tracing crate with configurable output
//! format and filtering. `RUST_LOG` overrides the configured level.

use crate::config::LoggingSettings;
use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
pub fn setup_logging(settings: &LoggingSettings, force_json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if force_json || settings.json_format {
        registry.with(fmt::layer().json().with_target(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    info!("Logging initialized with level: {}", settings.level);
    Ok(())
}
