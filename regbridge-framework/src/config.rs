//! Configuration primitives and the [`BridgeConfig`] trait.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::serialization::Format;

/// Zenoh connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// Zenoh mode: "client", "peer", or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Endpoints to connect to (for client mode).
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on (for peer/router mode).
    #[serde(default)]
    pub listen: Vec<String>,

    /// Username for user/password authentication against the router.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for user/password authentication against the router.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
            username: None,
            password: None,
        }
    }
}

impl ZenohConfig {
    /// Validate mode and credentials.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.mode.as_str(), "client" | "peer" | "router") {
            return Err(BridgeError::validation(format!(
                "zenoh.mode '{}' must be 'client', 'peer', or 'router'",
                self.mode
            )));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(BridgeError::validation(
                "zenoh.username and zenoh.password must be set together",
            ));
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Trait for bridge configuration types.
///
/// Implement this for a bridge's configuration struct to get loading and
/// validation, plus access to the fields the runner needs.
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix for this bridge.
    fn key_prefix(&self) -> &str;

    /// Payload serialization format.
    fn serialization(&self) -> Format {
        Format::Json
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading.
    fn validate(&self) -> Result<()> {
        self.zenoh().validate()
    }

    /// Load configuration from a JSON5 file and validate it.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }
}

/// Parse a JSON5 document without validating it.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(json5::from_str(content)?)
}
