//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors reported by a [`BusClient`](crate::BusClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The client is not connected to the broker.
    #[error("Bus client not connected")]
    NotConnected,

    /// The client was never started.
    #[error("Bus client not started")]
    NotStarted,

    /// The underlying client rejected the request.
    #[error("Bus client error: {0}")]
    Client(String),
}

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Hardware driver initialization error.
    #[error("Hardware initialization failed: {0}")]
    Hardware(String),

    /// Bus client error.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The broker could not be reached in time.
    #[error("Timed out after {timeout_ms}ms waiting for the MQTT broker")]
    ConnectTimeout { timeout_ms: u64 },

    /// The bridge is not online.
    #[error("Bridge is not online")]
    NotOnline,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a hardware initialization error.
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
