//! Active alarm counts from the relational alarm store.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use thiserror::Error;

use crate::config::AlarmStoreConfig;

/// Priority labels counted by every status query.
pub const PRIORITY_LABELS: [&str; 5] = ["prio1", "prio2", "prio3", "warnung", "info"];

/// Errors raised while querying the alarm store.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to acquire alarm store connection: {0}")]
    Acquire(String),
    #[error("Alarm count query failed: {0}")]
    Query(String),
    #[error("Unexpected alarm count row: {0}")]
    Decode(String),
}

/// Active alarm counts, total and per priority label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStatusSummary {
    pub total_active: u64,
    pub counts_by_priority: BTreeMap<String, u64>,
}

impl AlarmStatusSummary {
    /// Build a summary; labels from [`PRIORITY_LABELS`] missing in `counts`
    /// are reported as zero.
    pub fn new<'a>(total_active: u64, counts: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        let mut counts_by_priority: BTreeMap<String, u64> = PRIORITY_LABELS
            .iter()
            .map(|label| (label.to_string(), 0))
            .collect();
        for (label, count) in counts {
            counts_by_priority.insert(label.to_string(), count);
        }
        Self {
            total_active,
            counts_by_priority,
        }
    }
}

/// Anything that can answer the aggregate alarm count query.
pub trait AlarmCountSource: Send + Sync {
    fn fetch_summary(&self) -> impl Future<Output = Result<AlarmStatusSummary, QueryError>> + Send;
}

/// MySQL-backed alarm store.
pub struct SqlAlarmStore {
    pool: MySqlPool,
    query: String,
}

impl SqlAlarmStore {
    /// Create the pool without connecting; connections open on first use.
    pub fn connect_lazy(config: &AlarmStoreConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(3))
            .connect_lazy_with(options);

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            pool_size = config.pool_size,
            "Alarm store pool configured"
        );

        Self {
            pool,
            query: count_query(&config.table, &config.priority_column, &config.active_column),
        }
    }

    /// Connections currently borrowed from the pool.
    pub fn outstanding_handles(&self) -> u32 {
        self.pool
            .size()
            .saturating_sub(u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX))
    }
}

impl AlarmCountSource for SqlAlarmStore {
    async fn fetch_summary(&self) -> Result<AlarmStatusSummary, QueryError> {
        // Returned to the pool when dropped, on every path out of this scope.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| QueryError::Acquire(e.to_string()))?;

        let mut query = sqlx::query::<sqlx::MySql>(&self.query);
        for label in PRIORITY_LABELS {
            query = query.bind(label);
        }

        let row = query
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| QueryError::Query(e.to_string()))?;
        drop(conn);

        let total = read_count(&row, "total")?;
        let mut counts = Vec::with_capacity(PRIORITY_LABELS.len());
        for (index, label) in PRIORITY_LABELS.iter().enumerate() {
            counts.push((*label, read_count(&row, &format!("c{}", index))?));
        }

        Ok(AlarmStatusSummary::new(total, counts))
    }
}

fn read_count(row: &sqlx::mysql::MySqlRow, column: &str) -> Result<u64, QueryError> {
    let value: i64 = row
        .try_get(column)
        .map_err(|e| QueryError::Decode(format!("{}: {}", column, e)))?;
    u64::try_from(value)
        .map_err(|_| QueryError::Decode(format!("{} is negative: {}", column, value)))
}

/// Aggregate query counting active alarms in total and per priority label.
///
/// Takes one bind parameter per entry of [`PRIORITY_LABELS`]; identifiers
/// are validated by the configuration layer.
pub fn count_query(table: &str, priority_column: &str, active_column: &str) -> String {
    let per_label: Vec<String> = (0..PRIORITY_LABELS.len())
        .map(|index| {
            format!(
                "CAST(COALESCE(SUM(CASE WHEN `{}` = ? THEN 1 ELSE 0 END), 0) AS SIGNED) AS c{}",
                priority_column, index
            )
        })
        .collect();

    format!(
        "SELECT COUNT(*) AS total, {} FROM `{}` WHERE `{}` = 1",
        per_label.join(", "),
        table,
        active_column
    )
}
