//! Field-bus connection lifecycle.
//!
//! [`TransportSession`] owns the connection to the Modbus endpoint and the
//! single reconnect deadline. The deadline is one slot: arming it again
//! replaces the previous one, so reconnect attempts never pile up.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, timeout};
use tokio_modbus::client::{Context, tcp};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::ModbusConfig;

/// Errors raised by the field-bus transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Device exception: {0}")]
    Exception(String),
    #[error("Short read at {start}: expected {expected} registers, got {actual}")]
    ShortRead {
        start: u16,
        expected: u16,
        actual: usize,
    },
    #[error("Not connected")]
    NotConnected,
}

/// Opens sessions to a field-bus endpoint.
pub trait FieldbusConnector: Send + Sync {
    type Session: FieldbusSession;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;

    /// Establish a new session.
    fn connect(&self) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// An open field-bus session.
pub trait FieldbusSession: Send {
    /// Read `count` holding registers starting at `start`.
    fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, TransportError>> + Send;

    /// Release the underlying handle.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Modbus TCP connector built on `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct ModbusTcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl ModbusTcpConnector {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
        }
    }

    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.unit_id,
            config.timeout(),
        )
    }
}

impl FieldbusConnector for ModbusTcpConnector {
    type Session = ModbusTcpSession;

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<ModbusTcpSession, TransportError> {
        let addrs = timeout(
            self.timeout,
            tokio::net::lookup_host((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| {
            TransportError::Connect(format!("cannot resolve {}: {}", self.endpoint(), e))
        })?;

        let mut last_error =
            TransportError::Connect(format!("{} resolved to no addresses", self.endpoint()));

        for addr in addrs {
            match timeout(self.timeout, tcp::connect_slave(addr, Slave(self.unit_id))).await {
                Ok(Ok(ctx)) => {
                    return Ok(ModbusTcpSession {
                        ctx,
                        timeout: self.timeout,
                    });
                }
                Ok(Err(e)) => last_error = TransportError::Connect(format!("{}: {}", addr, e)),
                Err(_) => last_error = TransportError::Timeout(self.timeout),
            }
        }

        Err(last_error)
    }
}

/// An open Modbus TCP session.
pub struct ModbusTcpSession {
    ctx: Context,
    timeout: Duration,
}

impl FieldbusSession for ModbusTcpSession {
    async fn read_holding_registers(
        &mut self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        timeout(self.timeout, self.ctx.read_holding_registers(start, count))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Read(e.to_string()))?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }

    async fn close(&mut self) {
        match timeout(self.timeout, self.ctx.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Modbus disconnect reported an error"),
            Err(_) => debug!("Modbus disconnect timed out"),
        }
    }
}

/// Connection state of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Self-healing connection to the field-bus endpoint.
pub struct TransportSession<C: FieldbusConnector> {
    connector: C,
    session: Option<C::Session>,
    state: ConnectionState,
    reconnect_delay: Duration,
    reconnect_at: Option<Instant>,
}

impl<C: FieldbusConnector> TransportSession<C> {
    /// Create a disconnected session.
    pub fn new(connector: C, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            session: None,
            state: ConnectionState::Disconnected,
            reconnect_delay,
            reconnect_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// When the pending reconnect attempt is due, if one is armed.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Try to establish the session.
    ///
    /// Success cancels any pending reconnect. Failure leaves the session
    /// disconnected with exactly one reconnect armed.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        self.reconnect_at = None;
        self.state = ConnectionState::Connecting;
        debug!(endpoint = %self.connector.endpoint(), "Connecting to Modbus device");

        match self.connector.connect().await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                info!(endpoint = %self.connector.endpoint(), "Connected to Modbus device");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.schedule_reconnect();
                warn!(
                    endpoint = %self.connector.endpoint(),
                    error = %e,
                    retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    "Modbus connection failed"
                );
                Err(e)
            }
        }
    }

    /// Read a block of holding registers.
    ///
    /// Any I/O failure drops the connection and arms a reconnect.
    pub async fn read_block(&mut self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let session = match (self.state, self.session.as_mut()) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => return Err(TransportError::NotConnected),
        };

        let result = match session.read_holding_registers(start, count).await {
            Ok(words) if words.len() != usize::from(count) => Err(TransportError::ShortRead {
                start,
                expected: count,
                actual: words.len(),
            }),
            other => other,
        };

        if let Err(ref e) = result {
            warn!(
                endpoint = %self.connector.endpoint(),
                address = start,
                count,
                error = %e,
                "Modbus read failed, dropping connection"
            );
            self.close().await;
            self.schedule_reconnect();
        }

        result
    }

    /// Release the underlying handle. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            debug!(endpoint = %self.connector.endpoint(), "Modbus session closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn schedule_reconnect(&mut self) {
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    const DELAY: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let connector = MockConnector::default();
        let mut transport = TransportSession::new(connector.clone(), DELAY);

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.connect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert!(!transport.has_pending_reconnect());

        // Already connected: no second attempt.
        transport.connect().await.unwrap();
        assert_eq!(connector.script().connect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_keep_single_timer() {
        let connector = MockConnector::default();
        connector.script().connect_failures = 2;
        let mut transport = TransportSession::new(connector.clone(), DELAY);

        assert!(transport.connect().await.is_err());
        let first = transport.reconnect_deadline().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(transport.connect().await.is_err());
        let second = transport.reconnect_deadline().unwrap();

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(second - first, Duration::from_secs(3));
        assert_eq!(second, Instant::now() + DELAY);

        transport.connect().await.unwrap();
        assert!(transport.reconnect_deadline().is_none());
        assert_eq!(connector.script().connect_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_drops_connection() {
        let connector = MockConnector::with_registers([(10, 1), (11, 2)]);
        connector.script().failing_reads.insert(0);
        let mut transport = TransportSession::new(connector.clone(), DELAY);
        transport.connect().await.unwrap();

        let err = transport.read_block(10, 2).await.unwrap_err();
        assert!(matches!(err, TransportError::Read(_)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.reconnect_deadline(), Some(Instant::now() + DELAY));
        assert_eq!(connector.script().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_read_is_failure() {
        let connector = MockConnector::with_registers([(10, 1), (11, 2)]);
        connector.script().short_reads.insert(0);
        let mut transport = TransportSession::new(connector.clone(), DELAY);
        transport.connect().await.unwrap();

        let err = transport.read_block(10, 2).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ShortRead {
                start: 10,
                expected: 2,
                actual: 1
            }
        );
        assert!(!transport.is_connected());
        assert!(transport.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_when_disconnected() {
        let connector = MockConnector::default();
        let mut transport = TransportSession::new(connector.clone(), DELAY);

        let err = transport.read_block(0, 1).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert!(!transport.has_pending_reconnect());
        assert!(connector.script().reads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let connector = MockConnector::default();
        let mut transport = TransportSession::new(connector.clone(), DELAY);
        transport.connect().await.unwrap();

        transport.close().await;
        transport.close().await;

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(connector.script().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deadline() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let start = Instant::now();
        wait_for_deadline(Some(deadline)).await;
        assert!(Instant::now() - start >= Duration::from_secs(5));

        let pending = tokio::time::timeout(Duration::from_secs(60), wait_for_deadline(None)).await;
        assert!(pending.is_err());
    }
}
