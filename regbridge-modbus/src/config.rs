//! Configuration for the Modbus bridge.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regbridge_framework::{
    BridgeConfig, BridgeError, Format, LoggingConfig, Result, ZenohConfig, build_key,
    validate_key_expr,
};
use serde::{Deserialize, Serialize};

use crate::batcher::MAX_READ_QUANTITY;
use crate::register_map::{AddressMap, RegisterEntry};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Payload encoding for every published message
    #[serde(default)]
    pub serialization: Format,

    /// Field-bus endpoint and polling settings
    pub modbus: ModbusConfig,

    /// Topic names
    #[serde(default)]
    pub topics: TopicConfig,

    /// Relational store queried for active alarm counts
    #[serde(default)]
    pub alarm_store: Option<AlarmStoreConfig>,

    /// Monitored registers keyed by decimal address
    #[serde(default)]
    pub registers: BTreeMap<String, RegisterEntry>,

    /// Optional JSON5 file with more registers, relative to the config file
    #[serde(default)]
    pub register_file: Option<PathBuf>,
}

/// Modbus TCP endpoint and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Host name or IP address of the device
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and per-read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest number of registers per read request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u16,

    /// Poll cycle period in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Delay before retrying a failed or lost connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Low-priority registers are read every N-th cycle
    #[serde(default = "default_low_priority_cadence")]
    pub low_priority_cadence: u64,

    /// Topic class marking a register as low priority
    #[serde(default = "default_low_priority_class")]
    pub low_priority_class: String,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_batch_size() -> u16 {
    100
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    10_000
}

fn default_low_priority_cadence() -> u64 {
    5
}

fn default_low_priority_class() -> String {
    "lowprio".to_string()
}

impl ModbusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::validation("modbus.host cannot be empty"));
        }
        if !(1..=247).contains(&self.unit_id) {
            return Err(BridgeError::validation(format!(
                "modbus.unit_id {} must be 1-247",
                self.unit_id
            )));
        }
        if self.timeout_ms == 0 {
            return Err(BridgeError::validation("modbus.timeout_ms must be > 0"));
        }
        if !(1..=MAX_READ_QUANTITY).contains(&self.max_batch_size) {
            return Err(BridgeError::validation(format!(
                "modbus.max_batch_size {} must be 1-{}",
                self.max_batch_size, MAX_READ_QUANTITY
            )));
        }
        if self.polling_interval_ms == 0 {
            return Err(BridgeError::validation(
                "modbus.polling_interval_ms must be > 0",
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(BridgeError::validation(
                "modbus.reconnect_delay_ms must be > 0",
            ));
        }
        if self.low_priority_cadence == 0 {
            return Err(BridgeError::validation(
                "modbus.low_priority_cadence must be >= 1",
            ));
        }
        if self.low_priority_class.trim().is_empty() {
            return Err(BridgeError::validation(
                "modbus.low_priority_class cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Topic names for the published streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Key expression prefix (default: "regbridge/modbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Telemetry topic (default: "<key_prefix>/telemetry")
    #[serde(default)]
    pub telemetry: Option<String>,

    /// Alarm topic (default: "<key_prefix>/alarm")
    #[serde(default)]
    pub alarm: Option<String>,

    /// Alarm status topic (default: "<key_prefix>/status")
    #[serde(default)]
    pub status: Option<String>,
}

fn default_key_prefix() -> String {
    "regbridge/modbus".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            telemetry: None,
            alarm: None,
            status: None,
        }
    }
}

impl TopicConfig {
    pub fn telemetry_topic(&self) -> String {
        self.resolve(&self.telemetry, "telemetry")
    }

    pub fn alarm_topic(&self) -> String {
        self.resolve(&self.alarm, "alarm")
    }

    pub fn status_topic(&self) -> String {
        self.resolve(&self.status, "status")
    }

    fn resolve(&self, topic: &Option<String>, suffix: &str) -> String {
        topic
            .clone()
            .unwrap_or_else(|| build_key(&self.key_prefix, suffix))
    }

    fn validate(&self) -> Result<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(BridgeError::validation("topics.key_prefix cannot be empty"));
        }
        for (name, topic) in [
            ("telemetry", &self.telemetry),
            ("alarm", &self.alarm),
            ("status", &self.status),
        ] {
            if topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(BridgeError::validation(format!(
                    "topics.{} cannot be empty",
                    name
                )));
            }
        }

        validate_key_expr("topics.key_prefix", &self.key_prefix)?;
        for (name, topic) in [
            ("topics.telemetry", self.telemetry_topic()),
            ("topics.alarm", self.alarm_topic()),
            ("topics.status", self.status_topic()),
        ] {
            validate_key_expr(name, &topic)?;
        }
        Ok(())
    }
}

/// Connection to the relational store holding active alarms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmStoreConfig {
    pub host: String,

    #[serde(default = "default_mysql_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Table holding alarm rows
    #[serde(default = "default_table")]
    pub table: String,

    /// Column holding the priority label
    #[serde(default = "default_priority_column")]
    pub priority_column: String,

    /// Column that is 1 while an alarm is active
    #[serde(default = "default_active_column")]
    pub active_column: String,

    /// Status query period in milliseconds
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_pool_size() -> u32 {
    5
}

fn default_table() -> String {
    "alarms".to_string()
}

fn default_priority_column() -> String {
    "priority".to_string()
}

fn default_active_column() -> String {
    "active".to_string()
}

fn default_status_interval_ms() -> u64 {
    5000
}

impl AlarmStoreConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("host", &self.host),
            ("user", &self.user),
            ("database", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(BridgeError::validation(format!(
                    "alarm_store.{} cannot be empty",
                    name
                )));
            }
        }
        if self.pool_size == 0 {
            return Err(BridgeError::validation("alarm_store.pool_size must be >= 1"));
        }
        if self.status_interval_ms == 0 {
            return Err(BridgeError::validation(
                "alarm_store.status_interval_ms must be > 0",
            ));
        }
        for (name, value) in [
            ("table", &self.table),
            ("priority_column", &self.priority_column),
            ("active_column", &self.active_column),
        ] {
            if !is_identifier(value) {
                return Err(BridgeError::validation(format!(
                    "alarm_store.{} '{}' is not a plain SQL identifier",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Shape of a standalone register file.
#[derive(Debug, Deserialize)]
struct RegisterFile {
    registers: BTreeMap<String, RegisterEntry>,
}

impl ModbusBridgeConfig {
    /// Build the address map from the configured registers.
    pub fn address_map(&self) -> Result<AddressMap> {
        AddressMap::from_entries(&self.registers)
            .map_err(|e| BridgeError::validation(e.to_string()))
    }

    /// Merge the registers of `register_file` into `registers`.
    ///
    /// Relative paths resolve against `base_dir`. Does nothing when no file
    /// is configured.
    pub fn resolve_register_file(&mut self, base_dir: &Path) -> Result<()> {
        let Some(file) = self.register_file.take() else {
            return Ok(());
        };

        let path = if file.is_absolute() {
            file
        } else {
            base_dir.join(file)
        };

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let parsed: RegisterFile = json5::from_str(&content)?;

        for (key, entry) in parsed.registers {
            if self.registers.contains_key(&key) {
                return Err(BridgeError::validation(format!(
                    "register '{}' is defined both inline and in {}",
                    key,
                    path.display()
                )));
            }
            self.registers.insert(key, entry);
        }

        Ok(())
    }
}

impl BridgeConfig for ModbusBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.topics.key_prefix
    }

    fn serialization(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> Result<()> {
        self.zenoh.validate()?;
        self.modbus.validate()?;
        self.topics.validate()?;

        if let Some(store) = &self.alarm_store {
            store.validate()?;
        }

        if self.register_file.is_some() {
            return Err(BridgeError::validation(
                "register_file must be resolved before validation",
            ));
        }

        let map = self.address_map()?;
        if map.is_empty() {
            return Err(BridgeError::validation(
                "At least one register must be configured",
            ));
        }

        Ok(())
    }

    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Self = json5::from_str(&content)?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_register_file(base_dir)?;
        config.validate()?;

        Ok(config)
    }
}
