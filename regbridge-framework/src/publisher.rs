//! Publishing to the pub/sub bus.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::serialization::{Format, encode};

/// Capability for sending payloads to a topic.
///
/// Delivery is fire-and-forget: a successful return only means the payload
/// was handed to the bus.
pub trait Publish: Send + Sync {
    /// Serialization format used by [`publish`](Self::publish).
    fn format(&self) -> Format;

    /// Publish raw bytes to a topic.
    fn publish_raw(&self, topic: &str, payload: Vec<u8>)
    -> impl Future<Output = Result<()>> + Send;

    /// Encode a value with [`format`](Self::format) and publish it.
    fn publish<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let payload = encode(value, self.format())?;
            self.publish_raw(topic, payload).await
        }
    }
}

/// Publisher backed by a Zenoh session.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

impl Publish for Publisher {
    fn format(&self) -> Format {
        self.format
    }

    async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(topic, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: topic.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// Join a key prefix and a suffix with `/`.
pub fn build_key(prefix: &str, suffix: &str) -> String {
    match (prefix.is_empty(), suffix.is_empty()) {
        (_, true) => prefix.to_string(),
        (true, false) => suffix.to_string(),
        (false, false) => format!("{}/{}", prefix.trim_end_matches('/'), suffix),
    }
}

/// Reject `key` unless it is a valid Zenoh key expression.
///
/// `field` names the configuration entry in the error message.
pub fn validate_key_expr(field: &str, key: &str) -> Result<()> {
    zenoh::key_expr::KeyExpr::try_from(key)
        .map(|_| ())
        .map_err(|e| {
            BridgeError::validation(format!(
                "{} '{}' is not a valid key expression: {}",
                field, key, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publish for Recorder {
        fn format(&self) -> Format {
            Format::Json
        }

        async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[test]
    fn test_build_key() {
        assert_eq!(
            build_key("regbridge/modbus", "telemetry"),
            "regbridge/modbus/telemetry"
        );
        assert_eq!(build_key("regbridge/modbus/", "@/status"), "regbridge/modbus/@/status");
        assert_eq!(build_key("regbridge/modbus", ""), "regbridge/modbus");
        assert_eq!(build_key("", "alarms"), "alarms");
    }

    #[test]
    fn test_validate_key_expr() {
        assert!(validate_key_expr("topics.key_prefix", "regbridge/modbus").is_ok());
        assert!(validate_key_expr("topics.telemetry", "plant/line1/telemetry").is_ok());

        for key in ["plant/telemetry/", "plant//telemetry", "plant/tele?metry", "plant/#"] {
            let err = validate_key_expr("topics.telemetry", key).unwrap_err();
            assert!(err.is_config(), "{key}");
            assert!(err.to_string().contains("topics.telemetry"), "{key}");
        }
    }

    #[tokio::test]
    async fn test_publish_encodes_with_format() {
        let recorder = Recorder::default();
        recorder
            .publish("plant/status", &serde_json::json!({ "total": 3 }))
            .await
            .unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "plant/status");
        assert_eq!(sent[0].1, br#"{"total":3}"#);
    }
}
