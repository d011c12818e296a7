//! regbridge bridge framework
//!
//! Common plumbing for bridges that publish field data to Zenoh.
//!
//! # Overview
//!
//! This crate provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publish`] capability and its Zenoh-backed [`Publisher`]
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for lifecycle status reporting
//! - [`encode`]/[`decode`] for JSON and CBOR payloads
//!
//! # Example
//!
//! ```ignore
//! use regbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!     runner.spawn(my_worker(runner.publisher()));
//!
//!     runner.run_with_metadata(None).await
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod serialization;
mod session;
mod status;

pub use args::BridgeArgs;
pub use config::{BridgeConfig, LogFormat, LoggingConfig, ZenohConfig, parse_config};
pub use error::{BridgeError, Result};
pub use publisher::{Publish, Publisher, build_key, validate_key_expr};
pub use runner::BridgeRunner;
pub use serialization::{Format, decode, encode};
pub use session::connect;
pub use status::{BridgeStatus, StatusPublisher, status_key};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))
}
