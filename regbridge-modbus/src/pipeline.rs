//! The poll cycle: select, batch, read, scale, publish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regbridge_framework::Publish;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::batcher::{self, AddressGroup};
use crate::config::ModbusBridgeConfig;
use crate::point::{DataPoint, PointBatch, partition};
use crate::register_map::AddressMap;
use crate::scheduler::CycleScheduler;
use crate::transport::{FieldbusConnector, TransportError, TransportSession, wait_for_deadline};

/// Runtime parameters of the read pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_batch_size: u16,
    pub polling_interval: Duration,
    pub telemetry_topic: String,
    pub alarm_topic: String,
    pub low_priority_cadence: u64,
    pub low_priority_class: String,
}

impl PipelineSettings {
    pub fn from_config(config: &ModbusBridgeConfig) -> Self {
        Self {
            max_batch_size: config.modbus.max_batch_size,
            polling_interval: config.modbus.polling_interval(),
            telemetry_topic: config.topics.telemetry_topic(),
            alarm_topic: config.topics.alarm_topic(),
            low_priority_cadence: config.modbus.low_priority_cadence,
            low_priority_class: config.modbus.low_priority_class.clone(),
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The transport was down; nothing was read.
    NotConnected,
    /// No register was due this cycle.
    Idle,
    /// Every group was read and the streams were handed to the publisher.
    Published { telemetry: usize, alarms: usize },
    /// A group read failed; the rest of the cycle was dropped unpublished.
    Aborted {
        group: AddressGroup,
        error: TransportError,
    },
}

/// Drives one poll cycle per tick against a single field-bus session.
pub struct ReadPipeline<C: FieldbusConnector, P: Publish> {
    map: Arc<AddressMap>,
    scheduler: CycleScheduler,
    settings: PipelineSettings,
    transport: TransportSession<C>,
    publisher: P,
    cycle_index: u64,
}

impl<C: FieldbusConnector, P: Publish> ReadPipeline<C, P> {
    pub fn new(
        map: Arc<AddressMap>,
        settings: PipelineSettings,
        transport: TransportSession<C>,
        publisher: P,
    ) -> Self {
        let scheduler = CycleScheduler::new(
            settings.low_priority_cadence,
            settings.low_priority_class.clone(),
        );

        Self {
            map,
            scheduler,
            settings,
            transport,
            publisher,
            cycle_index: 0,
        }
    }

    /// Index the next cycle will run with.
    pub fn cycle_index(&self) -> u64 {
        self.cycle_index
    }

    pub fn transport(&self) -> &TransportSession<C> {
        &self.transport
    }

    /// Run one poll cycle. The cycle index advances exactly once, whatever
    /// the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cycle = self.cycle_index;
        let outcome = self.execute(cycle).await;
        self.cycle_index = self.cycle_index.wrapping_add(1);
        outcome
    }

    async fn execute(&mut self, cycle: u64) -> CycleOutcome {
        if !self.transport.is_connected() {
            debug!(cycle, state = %self.transport.state(), "Skipping poll cycle, not connected");
            return CycleOutcome::NotConnected;
        }

        let map = Arc::clone(&self.map);
        let selected: Vec<u16> = self
            .scheduler
            .select(&map, cycle)
            .iter()
            .map(|r| r.address)
            .collect();

        if selected.is_empty() {
            debug!(cycle, "No registers due this cycle");
            return CycleOutcome::Idle;
        }

        let groups = batcher::group(&selected, self.settings.max_batch_size);
        let mut points = Vec::with_capacity(selected.len());

        for group in groups.iter().copied() {
            let words = match self.transport.read_block(group.start, group.count).await {
                Ok(words) => words,
                Err(error) => {
                    warn!(
                        cycle,
                        address = group.start,
                        count = group.count,
                        error = %error,
                        "Poll cycle aborted, nothing published"
                    );
                    return CycleOutcome::Aborted { group, error };
                }
            };

            let observed_at = Utc::now();
            for (address, word) in group.addresses().zip(words) {
                if let Some(register) = map.get(address) {
                    points.push(DataPoint::from_word(register, word, observed_at));
                }
            }
        }

        let (telemetry, alarms) = partition(points);
        let telemetry_count = telemetry.len();
        let alarm_count = alarms.len();

        publish_points(
            &self.publisher,
            &self.settings.telemetry_topic,
            cycle,
            telemetry,
        )
        .await;
        if !alarms.is_empty() {
            publish_points(&self.publisher, &self.settings.alarm_topic, cycle, alarms).await;
        }

        debug!(
            cycle,
            groups = groups.len(),
            telemetry = telemetry_count,
            alarms = alarm_count,
            "Poll cycle complete"
        );

        CycleOutcome::Published {
            telemetry: telemetry_count,
            alarms: alarm_count,
        }
    }

    /// Connect, then alternate between poll ticks and reconnect attempts
    /// until the task is aborted.
    ///
    /// Cycles and connect attempts run on this one task, so a slow cycle
    /// delays the next tick instead of overlapping it.
    pub async fn run(mut self) {
        info!(
            endpoint = %self.transport.endpoint(),
            registers = self.map.len(),
            interval_ms = self.settings.polling_interval.as_millis() as u64,
            cadence = self.scheduler.cadence(),
            "Starting Modbus read pipeline"
        );

        if let Err(e) = self.transport.connect().await {
            debug!(error = %e, "Initial connect failed, reconnect deadline armed");
        }

        let mut ticker = interval(self.settings.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.transport.reconnect_deadline();
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = wait_for_deadline(deadline) => {
                    if self.transport.connect().await.is_ok() {
                        info!(endpoint = %self.transport.endpoint(), "Modbus connection restored");
                    }
                }
            }
        }
    }
}

/// Publish one cycle's points as a single batch. Failures are logged only.
async fn publish_points<P: Publish>(
    publisher: &P,
    topic: &str,
    cycle: u64,
    points: Vec<DataPoint>,
) {
    let batch = PointBatch::new(cycle, points);
    if let Err(e) = publisher.publish(topic, &batch).await {
        warn!(topic = %topic, cycle, error = %e, "Failed to publish points");
    }
}
