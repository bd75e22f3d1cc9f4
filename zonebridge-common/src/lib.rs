//! zonebridge Common Library
//!
//! This crate provides shared types and utilities for zonebridge MQTT bridges:
//!
//! - [`config`] - Shared config sections (MQTT broker, logging)
//! - [`topic`] - Topic builders and wildcard matching
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig};
pub use error::{Error, Result};
pub use topic::{
    DISCOVERY_PREFIX, Topics, is_wildcard, topic_matches, unique_id_from_topic, validate_name,
    wildcard_prefix,
};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. JSON output flattens event
/// fields into the top-level object.
///
/// ```ignore
/// use zonebridge_common::{LogFormat, LoggingConfig, init_tracing};
///
/// init_tracing(&LoggingConfig { level: "debug".into(), format: LogFormat::Json })?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
    };
    installed.map_err(|e| Error::Config(format!("tracing already initialized: {}", e)))
}
