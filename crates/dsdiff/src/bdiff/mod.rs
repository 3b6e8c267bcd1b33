//! Batched table comparison.
//!
//! For every table, the base data source (index 0) is loaded once and every
//! other data source is compared against it on its own executor lane:
//!
//! 1. `SELECT COUNT(*)` on the base; tables above `max_rows` are skipped
//! 2. `SELECT *` on the base, indexed by the first column
//! 3. one [`CompareJob`] per target, paginating with `LIMIT`/`OFFSET`
//! 4. sections written to `<output_dir>/<table>.csv` in data source order

mod classify;
mod index;
mod pages;
mod record;

pub use classify::{
    diff_row, generate_insert_sql, same_columns, skip_mask, BaseTable, TargetComparison,
    TargetSection, MASK_CELL,
};
pub use index::{MatchSet, RowIndex};
pub use pages::{compare_target, page_sql, PageSource, TablePages};
pub use record::{DiffKind, DiffRecord, BASE_KEY};

use crate::config::Config;
use crate::convert::RowSet;
use crate::count::parse_count;
use crate::error::{DsdiffError, Result};
use crate::executor::{JobExecutor, JobFailure, JobTicket};
use crate::job::{CompareJob, Job, JobOutput, QueryJob};
use crate::pool::ConnectionPool;
use crate::report::ReportWriter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Options of a bdiff run.
#[derive(Debug, Clone)]
pub struct BdiffOptions {
    /// Columns excluded from row equality.
    pub skip_columns: Vec<String>,
    /// Skip tables with more base rows than this. 0 disables the guard.
    pub max_rows: u64,
    /// Rows per target page. 0 reads whole tables.
    pub batch_size: u64,
    pub output_dir: PathBuf,
    /// Compare all targets of a table at once.
    pub parallel: bool,
    /// Stop at the next table once a job has failed.
    pub stop_on_error: bool,
}

impl BdiffOptions {
    /// Options from the `commands` and `executor` config sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            skip_columns: config.commands.bdiff_skip_columns.clone(),
            max_rows: config.commands.bdiff_max_rows,
            batch_size: config.commands.bdiff_batch_size,
            output_dir: config.commands.bdiff_output_dir.clone(),
            parallel: config.executor.parallel,
            stop_on_error: config.executor.stop_on_error,
        }
    }
}

/// How a table ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Compared,
    Skipped,
    Failed,
}

/// Outcome for one target of one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetReport {
    pub data_source_key: String,
    pub rows_compared: u64,
    pub extra: usize,
    pub missing: usize,
    /// `DIFF` pairs (each pair is two report rows).
    pub diff: usize,
    pub schema_mismatch: bool,
    /// Set when the comparison failed and its records were discarded.
    pub error: Option<String>,
}

impl TargetReport {
    fn from_section(section: &TargetSection) -> Self {
        Self {
            data_source_key: section.data_source_key.clone(),
            rows_compared: section.rows_compared,
            extra: section.count(DiffKind::Extra),
            missing: section.count(DiffKind::Missing),
            diff: section.count(DiffKind::Diff) / 2,
            schema_mismatch: section.schema_mismatch,
            error: None,
        }
    }
}

/// Outcome for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    /// Base row count from the guard query.
    pub base_rows: Option<u64>,
    pub targets: Vec<TargetReport>,
    /// Report file, when one was completed.
    pub report: Option<PathBuf>,
    pub error: Option<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Compared,
            base_rows: None,
            targets: Vec::new(),
            report: None,
            error: None,
        }
    }

    fn failed(mut self, e: &DsdiffError) -> Self {
        self.status = TableStatus::Failed;
        self.error = Some(e.to_string());
        self
    }
}

/// Result of a bdiff run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdiffSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `failed` or `aborted` (stopped early on error).
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_compared: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,

    /// Totals over all tables and targets.
    pub extra: usize,
    pub missing: usize,
    pub diff: usize,
    pub schema_mismatches: usize,

    pub tables: Vec<TableReport>,

    /// Failed jobs reported by the executor.
    pub failures: Vec<JobFailure>,
}

impl BdiffSummary {
    fn new(tables_total: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: "completed".to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables_total,
            tables_compared: 0,
            tables_skipped: 0,
            tables_failed: 0,
            extra: 0,
            missing: 0,
            diff: 0,
            schema_mismatches: 0,
            tables: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn add(&mut self, report: TableReport) {
        match report.status {
            TableStatus::Compared => self.tables_compared += 1,
            TableStatus::Skipped => self.tables_skipped += 1,
            TableStatus::Failed => self.tables_failed += 1,
        }
        for target in &report.targets {
            self.extra += target.extra;
            self.missing += target.missing;
            self.diff += target.diff;
            if target.schema_mismatch {
                self.schema_mismatches += 1;
            }
        }
        self.tables.push(report);
    }

    /// True when a table or a target comparison failed.
    pub fn has_failures(&self) -> bool {
        self.tables.iter().any(|t| {
            t.status == TableStatus::Failed || t.targets.iter().any(|tg| tg.error.is_some())
        })
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs bdiff over a connected pool.
pub struct BdiffEngine<'a> {
    pool: &'a ConnectionPool,
    executor: &'a JobExecutor<Job>,
    options: BdiffOptions,
}

impl<'a> BdiffEngine<'a> {
    pub fn new(pool: &'a ConnectionPool, executor: &'a JobExecutor<Job>, options: BdiffOptions) -> Self {
        Self {
            pool,
            executor,
            options,
        }
    }

    /// Compare every table, in order.
    ///
    /// Table-level failures are recorded in the summary. Report I/O errors
    /// and cancellation end the run with an error; reports already written
    /// stay on disk.
    pub async fn run(&self, tables: &[String]) -> Result<BdiffSummary> {
        let mut summary = BdiffSummary::new(tables.len());
        info!(
            "Starting bdiff run {}: {} tables, {} targets",
            summary.run_id,
            tables.len(),
            self.pool.len().saturating_sub(1)
        );

        // Failures from before this run are not ours
        self.executor.has_any_error();
        self.executor.take_failures();

        for (i, table) in tables.iter().enumerate() {
            if self.executor.is_cancelled() {
                return Err(DsdiffError::Cancelled);
            }

            let report = self.compare_table(table, (i + 1, tables.len())).await?;
            let table_failed = report.status == TableStatus::Failed;
            summary.add(report);

            if self.options.stop_on_error && (self.executor.has_any_error() || table_failed) {
                warn!("Stopping bdiff after {} because a job failed", table);
                summary.status = "aborted".to_string();
                break;
            }
        }

        summary.failures = self.executor.take_failures();
        if summary.status == "completed" && summary.has_failures() {
            summary.status = "failed".to_string();
        }
        summary.completed_at = Utc::now();
        summary.duration_seconds =
            (summary.completed_at - summary.started_at).num_milliseconds() as f64 / 1000.0;

        info!(
            "Bdiff {}: {} compared, {} skipped, {} failed ({} extra, {} missing, {} diff)",
            summary.status,
            summary.tables_compared,
            summary.tables_skipped,
            summary.tables_failed,
            summary.extra,
            summary.missing,
            summary.diff
        );
        Ok(summary)
    }

    async fn compare_table(&self, table: &str, ordinal: (usize, usize)) -> Result<TableReport> {
        let mut report = TableReport::new(table);
        let mut writer = ReportWriter::create(&self.options.output_dir, table)?;

        let (Some(base_connection), Some(base_source)) = (self.pool.connection(0), self.pool.source(0))
        else {
            return Err(DsdiffError::Executor("no base connection".into()));
        };
        let base_connection = base_connection.clone();
        let base_key = base_source.key();

        info!("Loading BASE data: {}", table);
        let count = self
            .query(QueryJob::count(base_connection.clone(), &base_key, table))
            .await
            .and_then(|rows| parse_count(&rows, table, &base_key));
        let count = match count {
            Ok(count) => count,
            Err(DsdiffError::Cancelled) => return Err(DsdiffError::Cancelled),
            Err(e) => {
                error!("Row count of {} failed: {}", table, e);
                return Ok(report.failed(&e));
            }
        };
        report.base_rows = Some(count);
        if self.options.max_rows > 0 && count > self.options.max_rows {
            info!(
                "Skip comparison because of too many rows in {} ({} > {})",
                table, count, self.options.max_rows
            );
            report.status = TableStatus::Skipped;
            return Ok(report);
        }

        let base_rows = match self
            .query(QueryJob::select_all(base_connection, &base_key, table))
            .await
        {
            Ok(rows) => rows,
            Err(DsdiffError::Cancelled) => return Err(DsdiffError::Cancelled),
            Err(e) => {
                error!("Loading BASE data of {} failed: {}", table, e);
                return Ok(report.failed(&e));
            }
        };

        writer.write_header(&base_rows.columns)?;
        let base = Arc::new(BaseTable::new(table, base_rows, &self.options.skip_columns));
        if !self.options.skip_columns.is_empty() {
            info!("{}: ignoring columns {:?}", table, base.skipped_columns());
        }

        let targets = self.pool.len().saturating_sub(1);
        let mut pending: Vec<(String, JobTicket<JobOutput>)> = Vec::with_capacity(targets);
        for lane in 1..self.pool.len() {
            let (Some(connection), Some(source)) =
                (self.pool.connection(lane), self.pool.source(lane))
            else {
                continue;
            };
            let job = CompareJob {
                connection: connection.clone(),
                key: source.key(),
                base: base.clone(),
                batch_size: self.options.batch_size,
                table_ordinal: ordinal,
                target_ordinal: (lane, targets),
            };
            let key = job.key.clone();
            let mut ticket = self.executor.submit(Job::Compare(job), lane).await?;
            if self.options.parallel {
                pending.push((key, ticket));
            } else {
                let result = ticket.wait().await;
                report
                    .targets
                    .push(self.write_target(&mut writer, table, &key, result)?);
            }
        }

        // Sections go out in data source order whatever order jobs finish in
        for (key, mut ticket) in pending {
            let result = ticket.wait().await;
            report
                .targets
                .push(self.write_target(&mut writer, table, &key, result)?);
        }

        let path = writer.finish()?;
        info!("Saved to csv file: {}", path.display());
        report.report = Some(path);
        Ok(report)
    }

    fn write_target(
        &self,
        writer: &mut ReportWriter,
        table: &str,
        key: &str,
        result: Result<JobOutput>,
    ) -> Result<TargetReport> {
        match result.and_then(JobOutput::into_section) {
            Ok(section) => {
                writer.write_section(&section.records)?;
                Ok(TargetReport::from_section(&section))
            }
            Err(DsdiffError::Cancelled) => Err(DsdiffError::Cancelled),
            Err(e) => {
                error!(
                    "Comparison of {} at {} failed, its records are discarded: {}",
                    table, key, e
                );
                Ok(TargetReport {
                    data_source_key: key.to_string(),
                    error: Some(e.to_string()),
                    ..Default::default()
                })
            }
        }
    }

    /// Run a query on the base lane and wait for its rows.
    async fn query(&self, job: QueryJob) -> Result<RowSet> {
        let mut ticket = self.executor.submit(Job::Query(job), 0).await?;
        ticket.wait().await.and_then(JobOutput::into_rows)
    }
}
