//! Data source connections.
//!
//! Every enabled data source gets exactly one persistent connection, opened
//! once at startup by a connect job running on that data source's lane.
//! `connections[i]` always belongs to `sources[i]`; index 0 is the base.

use crate::config::{Config, DataSourceConfig, DbType};
use crate::convert::RowSet;
use crate::error::{DsdiffError, Result};
use crate::executor::JobExecutor;
use crate::job::{ConnectJob, Job};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Executor, Statement};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Time allowed for opening a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single persistent connection to one data source.
///
/// Backed by a one-connection sqlx pool so the handle is cheap to clone into
/// jobs while the driver connection itself is never shared between queries.
#[derive(Clone)]
pub enum Connection {
    Mysql(MySqlPool),
    Sqlite(SqlitePool),
}

impl Connection {
    /// Open and ping a connection for a data source.
    pub async fn open(source: &DataSourceConfig, extra_args: &str) -> Result<Self> {
        let key = source.key();
        let connection = match source.r#type {
            DbType::Mysql => {
                let options = MySqlConnectOptions::from_str(&source.mysql_url(extra_args))
                    .map_err(|e| DsdiffError::connect(&key, e))?
                    .username(&source.username)
                    .password(&source.password);

                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| DsdiffError::connect(&key, e))?;
                Connection::Mysql(pool)
            }
            DbType::Sqlite => {
                let options = SqliteConnectOptions::new()
                    .filename(source.sqlite_path())
                    .create_if_missing(false)
                    .read_only(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| DsdiffError::connect(&key, e))?;
                Connection::Sqlite(pool)
            }
        };

        connection
            .ping()
            .await
            .map_err(|e| DsdiffError::connect(&key, e))?;
        Ok(connection)
    }

    /// Get the database type.
    pub fn db_type(&self) -> DbType {
        match self {
            Connection::Mysql(_) => DbType::Mysql,
            Connection::Sqlite(_) => DbType::Sqlite,
        }
    }

    /// Round-trip a trivial statement.
    pub async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        match self {
            Connection::Mysql(pool) => {
                sqlx::raw_sql("SELECT 1").execute(pool).await?;
            }
            Connection::Sqlite(pool) => {
                sqlx::raw_sql("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Run a query and convert the result to text rows.
    ///
    /// Column names of an empty result are taken from the prepared statement.
    pub async fn query_rows(&self, sql: &str) -> std::result::Result<RowSet, DsdiffError> {
        debug!("query: {}", sql);
        match self {
            Connection::Mysql(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                let columns = if rows.is_empty() {
                    statement_columns(Executor::prepare(pool, sql).await?.columns())
                } else {
                    Vec::new()
                };
                RowSet::from_rows(columns, &rows)
            }
            Connection::Sqlite(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                let columns = if rows.is_empty() {
                    statement_columns(Executor::prepare(pool, sql).await?.columns())
                } else {
                    Vec::new()
                };
                RowSet::from_rows(columns, &rows)
            }
        }
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        match self {
            Connection::Mysql(pool) => pool.close().await,
            Connection::Sqlite(pool) => pool.close().await,
        }
    }
}

fn statement_columns<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// Outcome of one connect job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReport {
    /// Position among enabled data sources (0 is the base).
    pub index: usize,
    /// Data source key (`url/schema`).
    pub key: String,
    /// Engine type.
    pub db_type: DbType,
    /// Whether the connection was opened and pinged.
    pub connected: bool,
    /// Time spent connecting.
    pub latency_ms: u64,
    /// Error message when not connected.
    pub error: Option<String>,
}

/// Result of probing every enabled data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// True when every data source connected.
    pub healthy: bool,
    /// One report per enabled data source.
    pub sources: Vec<ConnectReport>,
}

/// All connections of a session, index-aligned with the enabled data sources.
pub struct ConnectionPool {
    sources: Vec<DataSourceConfig>,
    connections: Vec<Connection>,
    reports: Vec<ConnectReport>,
}

impl ConnectionPool {
    /// Connect every enabled data source through the executor.
    ///
    /// Submits one connect job per data source to its own lane and waits
    /// for all of them before returning. Any failure is fatal; with
    /// `stop_other_jobs_when_error` the executor is cancelled on the first
    /// observed failure instead of waiting for the rest.
    pub async fn bootstrap(config: &Config, executor: &JobExecutor<Job>) -> Result<Self> {
        let sources = config.enabled_sources();
        let stop_early = config.executor.stop_other_jobs_when_error;
        let outcomes = Self::run_connect_jobs(config, &sources, executor, stop_early).await?;

        let mut connections = Vec::with_capacity(sources.len());
        let mut reports = Vec::with_capacity(sources.len());
        let mut failures = Vec::new();
        for (report, connection) in outcomes {
            if let Some(connection) = connection {
                connections.push(connection);
            } else {
                failures.push(format!(
                    "{}: {}",
                    report.key,
                    report.error.clone().unwrap_or_default()
                ));
            }
            reports.push(report);
        }

        if !failures.is_empty() || connections.len() != sources.len() {
            for connection in &connections {
                connection.close().await;
            }
            let key = reports
                .iter()
                .find(|r| !r.connected)
                .map(|r| r.key.clone())
                .unwrap_or_default();
            let message = if failures.is_empty() {
                "connect jobs were abandoned".to_string()
            } else {
                failures.join("; ")
            };
            return Err(DsdiffError::connect(key, message));
        }

        info!("Connected {} data sources", connections.len());
        Ok(Self {
            sources,
            connections,
            reports,
        })
    }

    /// Try to connect every enabled data source and report each outcome.
    ///
    /// Never fails because of an unreachable data source; connections that
    /// did open are closed again.
    pub async fn probe(config: &Config, executor: &JobExecutor<Job>) -> Result<HealthCheckResult> {
        let sources = config.enabled_sources();
        let outcomes = Self::run_connect_jobs(config, &sources, executor, false).await?;

        let mut reports = Vec::with_capacity(outcomes.len());
        for (report, connection) in outcomes {
            if let Some(connection) = connection {
                connection.close().await;
            }
            reports.push(report);
        }
        Ok(HealthCheckResult {
            healthy: reports.iter().all(|r| r.connected),
            sources: reports,
        })
    }

    async fn run_connect_jobs(
        config: &Config,
        sources: &[DataSourceConfig],
        executor: &JobExecutor<Job>,
        stop_early: bool,
    ) -> Result<Vec<(ConnectReport, Option<Connection>)>> {
        if executor.lanes() < sources.len() {
            return Err(DsdiffError::Executor(format!(
                "{} lanes for {} data sources",
                executor.lanes(),
                sources.len()
            )));
        }

        let mut tickets = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let job = ConnectJob {
                index,
                total: sources.len(),
                source: source.clone(),
                extra_args: config.data_source_args.clone(),
            };
            tickets.push(executor.submit(Job::Connect(job), index).await?);
        }

        let mut outcomes = Vec::with_capacity(sources.len());
        let mut abandon = false;
        for ((index, source), mut ticket) in sources.iter().enumerate().zip(tickets) {
            let started = Instant::now();
            let result = if abandon {
                Err(DsdiffError::Cancelled)
            } else {
                ticket.wait().await.and_then(|output| output.into_connected())
            };
            let mut report = ConnectReport {
                index,
                key: source.key(),
                db_type: source.r#type,
                connected: false,
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            };
            match result {
                Ok(connected) => {
                    report.connected = true;
                    report.latency_ms = connected.latency_ms;
                    outcomes.push((report, Some(connected.connection)));
                }
                Err(e) => {
                    error!("[{}/{}] {}", index + 1, sources.len(), e);
                    report.error = Some(e.to_string());
                    outcomes.push((report, None));
                    if stop_early && !abandon {
                        abandon = true;
                        executor.shutdown(false).await;
                    }
                }
            }
        }
        Ok(outcomes)
    }

    /// Number of connected data sources.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no data source is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connection `i`.
    pub fn connection(&self, i: usize) -> Option<&Connection> {
        self.connections.get(i)
    }

    /// Data source `i`.
    pub fn source(&self, i: usize) -> Option<&DataSourceConfig> {
        self.sources.get(i)
    }

    /// All enabled data sources in lane order.
    pub fn sources(&self) -> &[DataSourceConfig] {
        &self.sources
    }

    /// Connect reports captured during bootstrap.
    pub fn reports(&self) -> &[ConnectReport] {
        &self.reports
    }

    /// Close all connections.
    pub async fn close(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }
}
