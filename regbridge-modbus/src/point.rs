//! Scaled data points and the messages that carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::register_map::{Metadata, RegisterDescriptor};

/// A register value scaled into engineering units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub address: u16,
    pub value: f64,
    /// Topic class of the source register.
    #[serde(rename = "topic")]
    pub topic_class: String,
    #[serde(rename = "alarm")]
    pub alarm_eligible: bool,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub observed_at: DateTime<Utc>,
}

impl DataPoint {
    /// Build a point from a raw register word.
    pub fn from_word(register: &RegisterDescriptor, word: u16, observed_at: DateTime<Utc>) -> Self {
        Self {
            address: register.address,
            value: register.scale(word),
            topic_class: register.topic_class.clone(),
            alarm_eligible: register.alarm_eligible,
            metadata: register.metadata.clone(),
            observed_at,
        }
    }
}

/// One aggregate message per poll cycle and stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointBatch {
    /// Index of the poll cycle that produced the points.
    pub cycle: u64,
    /// Unix epoch milliseconds when the batch was assembled.
    pub timestamp: i64,
    pub points: Vec<DataPoint>,
}

impl PointBatch {
    pub fn new(cycle: u64, points: Vec<DataPoint>) -> Self {
        Self {
            cycle,
            timestamp: Utc::now().timestamp_millis(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Split a cycle's points into the full telemetry stream and its
/// alarm-eligible subset. Address order is kept in both.
pub fn partition(points: Vec<DataPoint>) -> (Vec<DataPoint>, Vec<DataPoint>) {
    let alarms = points.iter().filter(|p| p.alarm_eligible).cloned().collect();
    (points, alarms)
}
