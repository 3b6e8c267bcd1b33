//! Jobs run by the executor.
//!
//! Every unit of work is a variant of [`Job`]: opening a data source
//! connection, running one query, comparing one target of one table, or
//! looking up base rows one by one on a data source.
//! The executor only knows the [`Execute`] capability.

use crate::bdiff::{compare_target, BaseTable, TablePages, TargetSection};
use crate::config::DataSourceConfig;
use crate::convert::RowSet;
use crate::error::{DsdiffError, Result};
use crate::pool::Connection;
use crate::rowdiff::{diff_rows, RowDiffSection, TableLookup};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Context handed to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Lane the job runs on.
    pub lane: usize,
    /// Cancelled on immediate shutdown. Long jobs check it between steps.
    pub cancel: CancellationToken,
}

/// A unit of work the executor can run.
#[async_trait]
pub trait Execute: Send + 'static {
    type Output: Send + 'static;

    /// Short description used in logs and failure reports.
    fn label(&self) -> String;

    async fn execute(self, ctx: JobContext) -> Result<Self::Output>;
}

/// Open and ping the connection of one data source.
#[derive(Debug, Clone)]
pub struct ConnectJob {
    /// Position among enabled data sources.
    pub index: usize,
    pub total: usize,
    pub source: DataSourceConfig,
    /// Extra connection arguments for networked data sources.
    pub extra_args: String,
}

/// Run one statement on one data source.
#[derive(Clone)]
pub struct QueryJob {
    pub connection: Connection,
    /// Data source key.
    pub key: String,
    /// Table the statement reads, for error context.
    pub table: String,
    pub sql: String,
}

impl QueryJob {
    /// `SELECT COUNT(*)` of a table.
    pub fn count(connection: Connection, key: impl Into<String>, table: &str) -> Self {
        Self {
            connection,
            key: key.into(),
            table: table.to_string(),
            sql: format!("SELECT COUNT(*) FROM {}", table),
        }
    }

    /// `SELECT *` of a table.
    pub fn select_all(connection: Connection, key: impl Into<String>, table: &str) -> Self {
        Self {
            connection,
            key: key.into(),
            table: table.to_string(),
            sql: format!("SELECT * FROM {}", table),
        }
    }
}

/// Compare one target data source against a loaded base table.
#[derive(Clone)]
pub struct CompareJob {
    pub connection: Connection,
    /// Target data source key.
    pub key: String,
    pub base: Arc<BaseTable>,
    pub batch_size: u64,
    /// 1-based table position and table count, for progress lines.
    pub table_ordinal: (usize, usize),
    /// 1-based target position and target count, for progress lines.
    pub target_ordinal: (usize, usize),
}

/// Look up every base row by identity on one data source.
#[derive(Clone)]
pub struct RowDiffJob {
    pub connection: Connection,
    /// Data source key.
    pub key: String,
    /// Identity column looked up.
    pub column: String,
    pub base: Arc<BaseTable>,
    /// 1-based data source position and count, for progress lines.
    pub ordinal: (usize, usize),
}

/// Job variants.
pub enum Job {
    Connect(ConnectJob),
    Query(QueryJob),
    Compare(CompareJob),
    RowDiff(RowDiffJob),
}

/// An opened connection and how long opening it took.
pub struct Connected {
    pub connection: Connection,
    pub latency_ms: u64,
}

/// Output of a finished job.
pub enum JobOutput {
    Connected(Connected),
    Rows(RowSet),
    Section(TargetSection),
    Lines(RowDiffSection),
}

impl JobOutput {
    fn kind(&self) -> &'static str {
        match self {
            JobOutput::Connected(_) => "connection",
            JobOutput::Rows(_) => "rows",
            JobOutput::Section(_) => "section",
            JobOutput::Lines(_) => "lines",
        }
    }

    pub fn into_connected(self) -> Result<Connected> {
        match self {
            JobOutput::Connected(c) => Ok(c),
            other => Err(unexpected("connection", &other)),
        }
    }

    pub fn into_rows(self) -> Result<RowSet> {
        match self {
            JobOutput::Rows(rows) => Ok(rows),
            other => Err(unexpected("rows", &other)),
        }
    }

    pub fn into_section(self) -> Result<TargetSection> {
        match self {
            JobOutput::Section(section) => Ok(section),
            other => Err(unexpected("section", &other)),
        }
    }

    pub fn into_lines(self) -> Result<RowDiffSection> {
        match self {
            JobOutput::Lines(section) => Ok(section),
            other => Err(unexpected("lines", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &JobOutput) -> DsdiffError {
    DsdiffError::Executor(format!(
        "expected {} output, job produced {}",
        expected,
        got.kind()
    ))
}

#[async_trait]
impl Execute for Job {
    type Output = JobOutput;

    fn label(&self) -> String {
        match self {
            Job::Connect(job) => format!("connect {}", job.source.key()),
            Job::Query(job) => format!("query {} at {}", job.table, job.key),
            Job::Compare(job) => format!("compare {} at {}", job.base.table, job.key),
            Job::RowDiff(job) => format!("row diff {} at {}", job.base.table, job.key),
        }
    }

    async fn execute(self, ctx: JobContext) -> Result<JobOutput> {
        match self {
            Job::Connect(job) => job.run().await.map(JobOutput::Connected),
            Job::Query(job) => job.run().await.map(JobOutput::Rows),
            Job::Compare(job) => job.run(&ctx.cancel).await.map(JobOutput::Section),
            Job::RowDiff(job) => job.run(&ctx.cancel).await.map(JobOutput::Lines),
        }
    }
}

impl ConnectJob {
    async fn run(self) -> Result<Connected> {
        let key = self.source.key();
        info!(
            "[{}/{}] Connecting {} ({}) ...",
            self.index + 1,
            self.total,
            key,
            self.source.r#type
        );
        let started = Instant::now();
        let connection = Connection::open(&self.source, &self.extra_args).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        info!(
            "[{}/{}] Connected {} in {}ms",
            self.index + 1,
            self.total,
            key,
            latency_ms
        );
        Ok(Connected {
            connection,
            latency_ms,
        })
    }
}

impl QueryJob {
    async fn run(self) -> Result<RowSet> {
        self.connection
            .query_rows(&self.sql)
            .await
            .map_err(|e| DsdiffError::query(&self.table, &self.key, e))
    }
}

impl CompareJob {
    async fn run(self, cancel: &CancellationToken) -> Result<TargetSection> {
        let progress = format!(
            "Comparing table {} ({}/{}) at db {} ({}/{})",
            self.base.table,
            self.table_ordinal.0,
            self.table_ordinal.1,
            self.key,
            self.target_ordinal.0,
            self.target_ordinal.1
        );
        info!("{} ...", progress);

        let mut pages = TablePages::new(self.connection, &self.base.table, &self.key);
        let section =
            compare_target(&mut pages, &self.base, &self.key, self.batch_size, cancel).await?;

        info!("{} ... Done", progress);
        Ok(section)
    }
}

impl RowDiffJob {
    async fn run(self, cancel: &CancellationToken) -> Result<RowDiffSection> {
        let progress = format!(
            "Looking up {} rows of {} at db {} ({}/{})",
            self.base.index.len(),
            self.base.table,
            self.key,
            self.ordinal.0,
            self.ordinal.1
        );
        info!("{} ...", progress);

        let mut lookup = TableLookup::new(self.connection, &self.base.table, self.column, &self.key);
        let section = diff_rows(&mut lookup, &self.base, &self.key, cancel).await?;

        info!("{} ... Done", progress);
        Ok(section)
    }
}
