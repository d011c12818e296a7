//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

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

    /// Zenoh connection error.
    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// A worker task returned or panicked while the bridge was running.
    #[error("Worker exited unexpectedly: {0}")]
    WorkerExited(String),

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

    /// Whether this error was raised while loading or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigParse(_)
                | Self::ConfigValidation(_)
        )
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

impl From<ciborium::ser::Error<std::io::Error>> for BridgeError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for BridgeError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        assert!(BridgeError::validation("bad").is_config());
        assert!(
            BridgeError::ConfigNotFound {
                path: "x.json5".to_string()
            }
            .is_config()
        );
        assert!(
            !BridgeError::Publish {
                key: "a/b".to_string(),
                message: "closed".to_string()
            }
            .is_config()
        );
    }

    #[test]
    fn test_publish_error_message() {
        let err = BridgeError::Publish {
            key: "regbridge/modbus/telemetry".to_string(),
            message: "session closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to publish to regbridge/modbus/telemetry: session closed"
        );
    }
}
