//! Periodic alarm status summary.

use std::time::Duration;

use chrono::Utc;
use regbridge_framework::Publish;
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::alarm_store::{AlarmCountSource, AlarmStatusSummary};

/// Message published on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmStatusMessage {
    /// Unix epoch milliseconds when the counts were read.
    pub timestamp: i64,
    #[serde(flatten)]
    pub summary: AlarmStatusSummary,
}

/// Queries the alarm store on its own timer and publishes the counts.
///
/// Independent of the poll cycle and of the field-bus connection; nothing is
/// carried over from one tick to the next.
pub struct StatusAggregator<S, P> {
    source: S,
    publisher: P,
    topic: String,
    interval: Duration,
}

impl<S: AlarmCountSource, P: Publish> StatusAggregator<S, P> {
    pub fn new(source: S, publisher: P, topic: impl Into<String>, interval: Duration) -> Self {
        Self {
            source,
            publisher,
            topic: topic.into(),
            interval,
        }
    }

    /// Run one status query and publish the result.
    ///
    /// Returns the published summary, or `None` when the query failed.
    pub async fn tick(&self) -> Option<AlarmStatusSummary> {
        let summary = match self.source.fetch_summary().await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Alarm status query failed");
                return None;
            }
        };

        let message = AlarmStatusMessage {
            timestamp: Utc::now().timestamp_millis(),
            summary,
        };

        match self.publisher.publish(&self.topic, &message).await {
            Ok(()) => debug!(
                topic = %self.topic,
                total_active = message.summary.total_active,
                "Published alarm status"
            ),
            Err(e) => warn!(topic = %self.topic, error = %e, "Failed to publish alarm status"),
        }

        Some(message.summary)
    }

    /// Tick forever at the configured interval.
    pub async fn run(self) {
        info!(
            topic = %self.topic,
            interval_ms = self.interval.as_millis() as u64,
            "Starting alarm status aggregator"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm_store::QueryError;
    use crate::mock::{MockAlarmSource, RecordingPublisher};

    const TOPIC: &str = "regbridge/modbus/status";

    #[tokio::test]
    async fn test_tick_publishes_summary() {
        let summary = AlarmStatusSummary::new(4, [("prio1", 1), ("warnung", 3)]);
        let source = MockAlarmSource::with_results(vec![Ok(summary.clone())]);
        let publisher = RecordingPublisher::default();
        let aggregator =
            StatusAggregator::new(source, publisher.clone(), TOPIC, Duration::from_secs(5));

        assert_eq!(aggregator.tick().await, Some(summary.clone()));

        let messages: Vec<AlarmStatusMessage> = publisher.messages(TOPIC);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].summary, summary);
    }

    #[tokio::test]
    async fn test_wire_shape() {
        let summary = AlarmStatusSummary::new(1, [("info", 1)]);
        let source = MockAlarmSource::with_results(vec![Ok(summary)]);
        let publisher = RecordingPublisher::default();
        let aggregator =
            StatusAggregator::new(source, publisher.clone(), TOPIC, Duration::from_secs(5));
        aggregator.tick().await;

        let raw: Vec<serde_json::Value> = publisher.messages(TOPIC);
        assert_eq!(raw[0]["total_active"], 1);
        assert_eq!(raw[0]["counts_by_priority"]["info"], 1);
        assert_eq!(raw[0]["counts_by_priority"]["prio1"], 0);
        assert!(raw[0]["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_unreachable_store_releases_handles() {
        let source = MockAlarmSource::unreachable();
        let pool = source.pool.clone();
        let publisher = RecordingPublisher::default();
        let aggregator =
            StatusAggregator::new(source, publisher.clone(), TOPIC, Duration::from_secs(5));

        assert_eq!(aggregator.tick().await, None);

        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_next_tick() {
        let summary = AlarmStatusSummary::new(0, std::iter::empty());
        let source = MockAlarmSource::with_results(vec![
            Err(QueryError::Query("Lost connection to MySQL server".to_string())),
            Ok(summary.clone()),
        ]);
        let publisher = RecordingPublisher::default();
        let aggregator =
            StatusAggregator::new(source, publisher.clone(), TOPIC, Duration::from_secs(5));

        assert_eq!(aggregator.tick().await, None);
        assert_eq!(aggregator.tick().await, Some(summary));
        assert_eq!(publisher.count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let summary = AlarmStatusSummary::new(2, [("prio2", 2)]);
        let source = MockAlarmSource::with_results(vec![Ok(summary.clone())]);
        let aggregator = StatusAggregator::new(
            source,
            RecordingPublisher::failing(),
            TOPIC,
            Duration::from_secs(5),
        );

        assert_eq!(aggregator.tick().await, Some(summary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_ticking_after_failures() {
        let source = MockAlarmSource::unreachable();
        let pool = source.pool.clone();
        let aggregator = StatusAggregator::new(
            source,
            RecordingPublisher::default(),
            TOPIC,
            Duration::from_secs(5),
        );

        let task = tokio::spawn(aggregator.run());
        // Ticks at 0s, 5s, 10s and 15s.
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        task.abort();

        assert_eq!(pool.acquired(), 4);
        assert_eq!(pool.outstanding(), 0);
    }
}
