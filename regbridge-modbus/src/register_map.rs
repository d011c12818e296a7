//! The set of monitored holding registers.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata attached to a register and copied onto every data point.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Errors raised while building an [`AddressMap`].
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("register address '{0}' is not an integer in 0..=65535")]
    InvalidAddress(String),
    #[error("register address {0} is defined more than once")]
    DuplicateAddress(u16),
    #[error("register {address}: factor {factor} is not a finite number")]
    InvalidFactor { address: u16, factor: f64 },
    #[error("register {0}: topic class cannot be empty")]
    EmptyTopicClass(u16),
}

/// A register entry as written in configuration, keyed by its address string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterEntry {
    /// Multiplier applied to the raw register word.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Topic class, e.g. "temperature" or the low-priority marker.
    pub topic: String,

    /// Whether the register also goes to the alarm stream.
    #[serde(default)]
    pub alarm: bool,

    /// Free-form metadata forwarded with each data point.
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_factor() -> f64 {
    1.0
}

/// Description of a single monitored register.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    pub address: u16,
    pub factor: f64,
    pub topic_class: String,
    pub alarm_eligible: bool,
    pub metadata: Metadata,
}

impl RegisterDescriptor {
    /// Create a descriptor with no metadata.
    pub fn new(
        address: u16,
        factor: f64,
        topic_class: impl Into<String>,
        alarm_eligible: bool,
    ) -> Self {
        Self {
            address,
            factor,
            topic_class: topic_class.into(),
            alarm_eligible,
            metadata: Metadata::new(),
        }
    }

    /// Attach metadata to the descriptor.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Scale a raw register word into an engineering value.
    pub fn scale(&self, word: u16) -> f64 {
        f64::from(word) * self.factor
    }

    fn check(&self) -> Result<(), MapError> {
        if !self.factor.is_finite() {
            return Err(MapError::InvalidFactor {
                address: self.address,
                factor: self.factor,
            });
        }
        if self.topic_class.trim().is_empty() {
            return Err(MapError::EmptyTopicClass(self.address));
        }
        Ok(())
    }
}

/// Immutable, address-ordered set of register descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressMap {
    registers: BTreeMap<u16, RegisterDescriptor>,
}

impl AddressMap {
    /// Build a map from descriptors, rejecting duplicate addresses.
    pub fn new(
        descriptors: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Self, MapError> {
        let mut registers = BTreeMap::new();

        for descriptor in descriptors {
            descriptor.check()?;
            match registers.entry(descriptor.address) {
                Entry::Occupied(_) => return Err(MapError::DuplicateAddress(descriptor.address)),
                Entry::Vacant(slot) => {
                    slot.insert(descriptor);
                }
            }
        }

        Ok(Self { registers })
    }

    /// Build a map from configuration entries keyed by decimal address strings.
    ///
    /// Keys are compared numerically, so "10" and "010" collide.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, MapError>
    where
        I: IntoIterator<Item = (&'a String, &'a RegisterEntry)>,
    {
        let descriptors = entries
            .into_iter()
            .map(|(key, entry)| {
                let address = parse_address(key)?;
                Ok(RegisterDescriptor {
                    address,
                    factor: entry.factor,
                    topic_class: entry.topic.clone(),
                    alarm_eligible: entry.alarm,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect::<Result<Vec<_>, MapError>>()?;

        Self::new(descriptors)
    }

    /// Look up the descriptor for an address.
    pub fn get(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.registers.get(&address)
    }

    /// Iterate descriptors in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.values()
    }

    /// All addresses in ascending order.
    pub fn addresses(&self) -> Vec<u16> {
        self.registers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Number of registers flagged for the alarm stream.
    pub fn alarm_count(&self) -> usize {
        self.iter().filter(|r| r.alarm_eligible).count()
    }
}

fn parse_address(key: &str) -> Result<u16, MapError> {
    key.trim()
        .parse::<u16>()
        .map_err(|_| MapError::InvalidAddress(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(topic: &str) -> RegisterEntry {
        RegisterEntry {
            factor: 1.0,
            topic: topic.to_string(),
            alarm: false,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_scale() {
        let register = RegisterDescriptor::new(100, 0.1, "temperature", false);
        assert!((register.scale(235) - 23.5).abs() < 1e-9);
    }

    #[test]
    fn test_ordered_by_address() {
        let map = AddressMap::new([
            RegisterDescriptor::new(20, 1.0, "a", false),
            RegisterDescriptor::new(3, 1.0, "b", true),
            RegisterDescriptor::new(11, 1.0, "c", false),
        ])
        .unwrap();

        assert_eq!(map.addresses(), vec![3, 11, 20]);
        assert_eq!(map.alarm_count(), 1);
        assert_eq!(map.get(3).map(|r| r.topic_class.as_str()), Some("b"));
        assert!(map.get(4).is_none());
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let result = AddressMap::new([
            RegisterDescriptor::new(7, 1.0, "a", false),
            RegisterDescriptor::new(7, 2.0, "b", false),
        ]);
        assert_eq!(result, Err(MapError::DuplicateAddress(7)));
    }

    #[test]
    fn test_numeric_key_collision_rejected() {
        let mut entries = BTreeMap::new();
        entries.insert("10".to_string(), entry("a"));
        entries.insert("010".to_string(), entry("b"));

        let result = AddressMap::from_entries(&entries);
        assert_eq!(result, Err(MapError::DuplicateAddress(10)));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        for key in ["-1", "65536", "ten", ""] {
            let mut entries = BTreeMap::new();
            entries.insert(key.to_string(), entry("a"));
            assert_eq!(
                AddressMap::from_entries(&entries),
                Err(MapError::InvalidAddress(key.to_string())),
                "key {key:?}"
            );
        }
    }

    #[test]
    fn test_non_finite_factor_rejected() {
        let result = AddressMap::new([RegisterDescriptor::new(1, f64::NAN, "a", false)]);
        assert!(matches!(result, Err(MapError::InvalidFactor { address: 1, .. })));
    }

    #[test]
    fn test_empty_topic_rejected() {
        let result = AddressMap::new([RegisterDescriptor::new(1, 1.0, " ", false)]);
        assert_eq!(result, Err(MapError::EmptyTopicClass(1)));
    }

    #[test]
    fn test_entry_defaults() {
        let entry: RegisterEntry = json5::from_str(r#"{ topic: "pressure" }"#).unwrap();
        assert_eq!(entry.factor, 1.0);
        assert!(!entry.alarm);
        assert!(entry.metadata.is_empty());
    }
}
