//! Bridge lifecycle status.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::{Publish, Publisher, build_key};

/// Lifecycle message published when a bridge starts or stops.
///
/// `metadata` is flattened into the top-level object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub version: String,
    /// "running" or "offline".
    pub status: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl BridgeStatus {
    fn new(bridge: &str, version: &str, status: &str) -> Self {
        Self {
            bridge: bridge.to_string(),
            version: version.to_string(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn running(bridge: &str, version: &str) -> Self {
        Self::new(bridge, version, "running")
    }

    pub fn offline(bridge: &str, version: &str) -> Self {
        Self::new(bridge, version, "offline")
    }

    /// Attach metadata. Non-object values are stored under `"metadata"`.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match metadata {
            serde_json::Value::Object(map) => self.metadata = map,
            serde_json::Value::Null => {}
            other => {
                self.metadata.insert("metadata".to_string(), other);
            }
        }
        self
    }
}

/// Key expression carrying the lifecycle status of a bridge.
pub fn status_key(key_prefix: &str) -> String {
    build_key(key_prefix, "@/status")
}

/// Publishes a bridge's lifecycle messages on `<key_prefix>/@/status`.
pub struct StatusPublisher<P: Publish = Publisher> {
    publisher: P,
    key: String,
    bridge: String,
    version: String,
}

impl<P: Publish> StatusPublisher<P> {
    pub fn new(
        publisher: P,
        key_prefix: &str,
        bridge: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            key: status_key(key_prefix),
            bridge: bridge.into(),
            version: version.into(),
        }
    }

    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge, &self.version);
        if let Some(metadata) = metadata {
            status = status.with_metadata(metadata);
        }
        self.publisher.publish(&self.key, &status).await
    }

    pub async fn publish_offline(&self) -> Result<()> {
        let status = BridgeStatus::offline(&self.bridge, &self.version);
        self.publisher.publish(&self.key, &status).await
    }
}
