//! Zenoh bridge for Modbus TCP holding registers.
//!
//! Polls a fixed set of holding registers from one Modbus TCP device, scales
//! the raw words into data points and republishes them to Zenoh. Alarm-flagged
//! registers additionally go to an alarm stream, and an optional MySQL alarm
//! store is summarized on its own timer.
//!
//! # Key Expressions
//!
//! ```text
//! regbridge/modbus/telemetry   every point read in a cycle
//! regbridge/modbus/alarm       alarm-flagged points of a cycle
//! regbridge/modbus/status      active alarm counts
//! regbridge/modbus/@/status    bridge lifecycle (running/offline)
//! ```
//!
//! The prefix comes from `topics.key_prefix`; each stream topic can be
//! overridden individually.

pub mod aggregator;
pub mod alarm_store;
pub mod batcher;
pub mod config;
pub mod pipeline;
pub mod point;
pub mod register_map;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod mock;
