//! In-memory field-bus, publisher and alarm store for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use regbridge_framework::{BridgeError, Format, Publish, decode};
use serde::de::DeserializeOwned;

use crate::alarm_store::{AlarmCountSource, AlarmStatusSummary, QueryError};
use crate::transport::{FieldbusConnector, FieldbusSession, TransportError};

/// Scripted behavior and recorded calls of the mock field-bus.
#[derive(Debug, Default)]
pub struct FieldbusScript {
    /// Register bank served by reads; missing addresses read as zero.
    pub registers: HashMap<u16, u16>,
    /// Number of upcoming connect attempts that fail.
    pub connect_failures: usize,
    /// Indices (0-based, over all reads) of reads that fail.
    pub failing_reads: HashSet<usize>,
    /// Indices of reads that return one word fewer than requested.
    pub short_reads: HashSet<usize>,
    pub connect_attempts: usize,
    pub reads: Vec<(u16, u16)>,
    pub closes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<FieldbusScript>>,
}

impl MockConnector {
    pub fn with_registers(registers: impl IntoIterator<Item = (u16, u16)>) -> Self {
        let connector = Self::default();
        connector.script().registers.extend(registers);
        connector
    }

    pub fn script(&self) -> MutexGuard<'_, FieldbusScript> {
        self.script.lock().unwrap()
    }
}

impl FieldbusConnector for MockConnector {
    type Session = MockSession;

    fn endpoint(&self) -> String {
        "mock:502".to_string()
    }

    async fn connect(&self) -> Result<MockSession, TransportError> {
        let mut script = self.script();
        script.connect_attempts += 1;
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        Ok(MockSession {
            script: self.script.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockSession {
    script: Arc<Mutex<FieldbusScript>>,
}

impl FieldbusSession for MockSession {
    async fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut script = self.script.lock().unwrap();
        let index = script.reads.len();
        script.reads.push((start, count));

        if script.failing_reads.contains(&index) {
            return Err(TransportError::Read("connection reset by peer".to_string()));
        }

        let mut words: Vec<u16> = (u32::from(start)..u32::from(start) + u32::from(count))
            .map(|a| script.registers.get(&(a as u16)).copied().unwrap_or(0))
            .collect();
        if script.short_reads.contains(&index) {
            words.pop();
        }
        Ok(words)
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closes += 1;
    }
}

/// Publisher that records every message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail: bool,
}

impl RecordingPublisher {
    /// A publisher whose every publish fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn topics(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Decode every message sent to `topic`, in order.
    pub fn messages<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| decode(payload, Format::Json).unwrap())
            .collect()
    }
}

impl Publish for RecordingPublisher {
    fn format(&self) -> Format {
        Format::Json
    }

    async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> regbridge_framework::Result<()> {
        if self.fail {
            return Err(BridgeError::Publish {
                key: topic.to_string(),
                message: "session closed".to_string(),
            });
        }
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

/// Tracks handles borrowed from a pretend connection pool.
#[derive(Debug, Clone, Default)]
pub struct HandlePool {
    outstanding: Arc<AtomicUsize>,
    acquired: Arc<AtomicUsize>,
}

impl HandlePool {
    pub fn acquire(&self) -> PooledHandle {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        PooledHandle {
            outstanding: self.outstanding.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

pub struct PooledHandle {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Alarm source answering from a queue of scripted results.
#[derive(Debug, Clone, Default)]
pub struct MockAlarmSource {
    pub pool: HandlePool,
    results: Arc<Mutex<Vec<Result<AlarmStatusSummary, QueryError>>>>,
}

impl MockAlarmSource {
    /// Queue results; once exhausted every query reports the store as unreachable.
    pub fn with_results(results: Vec<Result<AlarmStatusSummary, QueryError>>) -> Self {
        let mut results = results;
        results.reverse();
        Self {
            pool: HandlePool::default(),
            results: Arc::new(Mutex::new(results)),
        }
    }

    pub fn unreachable() -> Self {
        Self::with_results(Vec::new())
    }
}

impl AlarmCountSource for MockAlarmSource {
    async fn fetch_summary(&self) -> Result<AlarmStatusSummary, QueryError> {
        let _handle = self.pool.acquire();
        self.results.lock().unwrap().pop().unwrap_or_else(|| {
            Err(QueryError::Acquire(
                "Connection refused (os error 111)".to_string(),
            ))
        })
    }
}
