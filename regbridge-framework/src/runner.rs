//! Bridge lifecycle: startup, worker tasks, shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::BridgeArgs;
use crate::config::{BridgeConfig, LoggingConfig};
use crate::error::{BridgeError, Result};
use crate::init_tracing;
use crate::publisher::Publisher;
use crate::session::connect;
use crate::status::StatusPublisher;

/// How long aborted workers get to unwind before the session closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the Zenoh session and the worker tasks of one bridge process.
///
/// Workers are expected to run forever. The runner stops on Ctrl+C or
/// SIGTERM, or as soon as any worker returns or panics.
pub struct BridgeRunner<C: BridgeConfig> {
    name: String,
    version: String,
    config: C,
    session: Arc<zenoh::Session>,
    publisher: Publisher,
    status_publisher: Option<StatusPublisher>,
    workers: JoinSet<()>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Initialize tracing, open the Zenoh session and build the publisher.
    ///
    /// `args.log_level` takes precedence over `logging.level`.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };
        init_tracing(&log_config)?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = Arc::new(connect(config.zenoh()).await?);
        let publisher = Publisher::new(
            session.clone(),
            config.key_prefix(),
            config.serialization(),
        );

        Ok(Self {
            name,
            version,
            config,
            session,
            publisher,
            status_publisher: None,
            workers: JoinSet::new(),
        })
    }

    /// Publish "running"/"offline" lifecycle messages on `<prefix>/@/status`.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            self.publisher.key_prefix(),
            &self.name,
            &self.version,
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// A publisher sharing the runner's session.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Spawn a worker. It is aborted when the bridge shuts down.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.spawn(future);
    }

    /// Run until shutdown is requested, publishing `metadata` with the
    /// "running" status.
    ///
    /// Fails with [`BridgeError::WorkerExited`] when the bridge stopped
    /// because a worker returned or panicked.
    pub async fn run_with_metadata(mut self, metadata: Option<serde_json::Value>) -> Result<()> {
        if let Some(status) = &self.status_publisher {
            if let Err(e) = status.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            bridge = %self.name,
            workers = self.workers.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let stop = wait_for_stop(&mut self.workers, shutdown_signal()).await;
        match &stop {
            StopReason::Signal => {
                tracing::info!(bridge = %self.name, "Received shutdown signal");
            }
            StopReason::WorkerExited(reason) => {
                tracing::error!(
                    bridge = %self.name,
                    reason = %reason,
                    "Worker exited unexpectedly"
                );
            }
        }

        if !drain(&mut self.workers, DRAIN_TIMEOUT).await {
            tracing::warn!(bridge = %self.name, "Workers did not stop in time");
        }

        if let Some(status) = &self.status_publisher {
            if let Err(e) = status.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Bridge stopped");

        match stop {
            StopReason::Signal => Ok(()),
            StopReason::WorkerExited(reason) => Err(BridgeError::WorkerExited(reason)),
        }
    }
}

/// Why the bridge is shutting down.
#[derive(Debug, PartialEq)]
enum StopReason {
    Signal,
    WorkerExited(String),
}

/// Wait for `shutdown` or for the first worker to finish.
///
/// With no workers left only `shutdown` can end the wait.
async fn wait_for_stop(
    workers: &mut JoinSet<()>,
    shutdown: impl Future<Output = ()>,
) -> StopReason {
    tokio::select! {
        _ = shutdown => StopReason::Signal,
        Some(joined) = workers.join_next() => match joined {
            Ok(()) => StopReason::WorkerExited("worker returned".to_string()),
            Err(e) if e.is_panic() => {
                StopReason::WorkerExited(format!("worker panicked: {}", e))
            }
            Err(e) => StopReason::WorkerExited(e.to_string()),
        },
    }
}

/// Abort all workers and wait up to `timeout` for them to finish.
///
/// Returns false if some worker was still running at the deadline.
async fn drain(workers: &mut JoinSet<()>, timeout: Duration) -> bool {
    workers.abort_all();
    tokio::time::timeout(timeout, async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .is_ok()
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
