//! Zenoh bridge for Modbus TCP holding registers.

use std::sync::Arc;

use anyhow::{Context, Result};
use regbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

use regbridge_modbus::aggregator::StatusAggregator;
use regbridge_modbus::alarm_store::SqlAlarmStore;
use regbridge_modbus::config::ModbusBridgeConfig;
use regbridge_modbus::pipeline::{PipelineSettings, ReadPipeline};
use regbridge_modbus::transport::{ModbusTcpConnector, TransportSession};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("regbridge.json5");

    let config = ModbusBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    let map = Arc::new(config.address_map()?);

    let mut runner = BridgeRunner::new_with_args("modbus", config, Some(&args))
        .await?
        .with_status_publishing();

    let modbus = runner.config().modbus.clone();
    let topics = runner.config().topics.clone();

    let connector = ModbusTcpConnector::from_config(&modbus);
    let endpoint = format!("{}:{}", modbus.host, modbus.port);
    let transport = TransportSession::new(connector, modbus.reconnect_delay());
    let pipeline = ReadPipeline::new(
        Arc::clone(&map),
        PipelineSettings::from_config(runner.config()),
        transport,
        runner.publisher(),
    );
    runner.spawn(pipeline.run());

    match runner.config().alarm_store.clone() {
        Some(store_config) => {
            let aggregator = StatusAggregator::new(
                SqlAlarmStore::connect_lazy(&store_config),
                runner.publisher(),
                topics.status_topic(),
                store_config.status_interval(),
            );
            runner.spawn(aggregator.run());
        }
        None => tracing::info!("No alarm_store configured, alarm status disabled"),
    }

    let metadata = serde_json::json!({
        "endpoint": endpoint,
        "unit_id": modbus.unit_id,
        "registers": map.len(),
        "alarm_registers": map.alarm_count(),
        "polling_interval_ms": modbus.polling_interval_ms,
        "topics": {
            "telemetry": topics.telemetry_topic(),
            "alarm": topics.alarm_topic(),
            "status": topics.status_topic(),
        },
    });

    runner.run_with_metadata(Some(metadata)).await?;
    Ok(())
}
