//! Row count report across all data sources.

use crate::convert::RowSet;
use crate::error::{DsdiffError, Result};
use crate::executor::{JobExecutor, JobTicket};
use crate::job::{Job, JobOutput, QueryJob};
use crate::pool::ConnectionPool;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Default count report file.
pub const COUNT_FILE: &str = "count.csv";

/// Cell written when a count could not be taken.
pub const ERROR_CELL: &str = "ERROR";

/// Read the value of a `SELECT COUNT(*)` result.
pub fn parse_count(rows: &RowSet, table: &str, key: &str) -> Result<u64> {
    let cell = rows
        .scalar()
        .ok_or_else(|| DsdiffError::query(table, key, "count returned no rows"))?;
    cell.trim()
        .parse::<u64>()
        .map_err(|e| DsdiffError::query(table, key, format!("count {:?} is not a number: {}", cell, e)))
}

/// Counts of one table on every data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCounts {
    pub table: String,
    /// One entry per data source, `None` where counting failed.
    pub counts: Vec<Option<u64>>,
}

impl TableCounts {
    /// True when every data source returned the same count.
    pub fn consistent(&self) -> bool {
        let mut counts = self.counts.iter();
        match counts.next() {
            Some(first) => counts.all(|c| c == first),
            None => true,
        }
    }
}

/// Result of a count run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountSummary {
    /// Data source keys, in column order.
    pub data_sources: Vec<String>,
    pub tables: Vec<TableCounts>,
    pub output: PathBuf,
}

/// Counts rows of tables on every data source in parallel.
pub struct CountReport<'a> {
    pool: &'a ConnectionPool,
    executor: &'a JobExecutor<Job>,
    output: PathBuf,
}

impl<'a> CountReport<'a> {
    pub fn new(pool: &'a ConnectionPool, executor: &'a JobExecutor<Job>, output: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            executor,
            output: output.into(),
        }
    }

    /// Count every table on every data source and write the report.
    ///
    /// Each data source counts its tables on its own lane. The report is
    /// written even when some counts failed; the first failure is returned
    /// afterwards.
    pub async fn run(&self, tables: &[String]) -> Result<CountSummary> {
        let keys: Vec<String> = self.pool.sources().iter().map(|s| s.key()).collect();

        let mut tickets: Vec<Vec<JobTicket<JobOutput>>> = Vec::with_capacity(tables.len());
        for table in tables {
            let mut row = Vec::with_capacity(keys.len());
            for (lane, key) in keys.iter().enumerate() {
                let connection = self
                    .pool
                    .connection(lane)
                    .ok_or_else(|| DsdiffError::Executor(format!("no connection for {}", key)))?
                    .clone();
                let job = QueryJob::count(connection, key, table);
                row.push(self.executor.submit(Job::Query(job), lane).await?);
            }
            tickets.push(row);
        }
        self.executor.wait_for_idle().await;

        let mut first_error = None;
        let mut results = Vec::with_capacity(tables.len());
        for (table, row) in tables.iter().zip(tickets) {
            let mut counts = Vec::with_capacity(row.len());
            for (key, mut ticket) in keys.iter().zip(row) {
                let count = ticket
                    .wait()
                    .await
                    .and_then(JobOutput::into_rows)
                    .and_then(|rows| parse_count(&rows, table, key));
                match count {
                    Ok(count) => counts.push(Some(count)),
                    Err(e) => {
                        error!("Count of {} at {} failed: {}", table, key, e);
                        counts.push(None);
                        first_error.get_or_insert(e);
                    }
                }
            }
            results.push(TableCounts {
                table: table.clone(),
                counts,
            });
        }

        write_count_csv(&self.output, &keys, &results)?;
        info!("Result saved to {}", self.output.display());

        match first_error {
            Some(e) => Err(e),
            None => Ok(CountSummary {
                data_sources: keys,
                tables: results,
                output: self.output.clone(),
            }),
        }
    }
}

/// Write `Tables,<key...>` followed by one row per table.
pub fn write_count_csv(path: &Path, keys: &[String], tables: &[TableCounts]) -> Result<()> {
    let report_err = |e: csv::Error| DsdiffError::report(path.display().to_string(), e);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| DsdiffError::report(dir.display().to_string(), e))?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(report_err)?;
    let header = std::iter::once("Tables").chain(keys.iter().map(String::as_str));
    writer.write_record(header).map_err(report_err)?;
    for table in tables {
        let mut record = Vec::with_capacity(table.counts.len() + 1);
        record.push(table.table.clone());
        record.extend(table.counts.iter().map(|c| match c {
            Some(count) => count.to_string(),
            None => ERROR_CELL.to_string(),
        }));
        writer.write_record(&record).map_err(report_err)?;
    }
    writer
        .flush()
        .map_err(|e| DsdiffError::report(path.display().to_string(), e))
}
