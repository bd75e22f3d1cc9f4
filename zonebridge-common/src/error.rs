use thiserror::Error;

/// Common error type for zonebridge components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid topic: {0}")]
    Topic(String),
}

/// Result type alias using zonebridge's Error.
pub type Result<T> = std::result::Result<T, Error>;
