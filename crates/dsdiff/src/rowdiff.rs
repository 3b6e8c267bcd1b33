//! Row-by-row lookup diff of one table against a chosen base data source.
//!
//! Every base row is looked up by its identity value on every data source,
//! the base included. Each lookup ends in one of:
//!
//! - no row: a `[NO_DATA]` line
//! - more than one row: a `[DUPLICATED_DATA]` line
//! - one differing row: a line with changed cells as `target [base]`
//! - one equal row: nothing
//!
//! Lines go to `<output_dir>/diff-<table>.csv` under a
//! `DataSource,<base columns>` header, grouped by data source in order.

use crate::bdiff::{diff_row, BaseTable};
use crate::config::DbType;
use crate::convert::{Row, RowSet, NULL_CELL};
use crate::error::{DsdiffError, Result};
use crate::executor::{JobExecutor, JobTicket};
use crate::job::{Job, JobOutput, QueryJob, RowDiffJob};
use crate::pool::{Connection, ConnectionPool};
use crate::report::ReportWriter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tip for an identity absent from a data source.
pub const NO_DATA: &str = "[NO_DATA]";

/// Tip for an identity present more than once on a data source.
pub const DUPLICATED_DATA: &str = "[DUPLICATED_DATA]";

/// First header column of a row diff report.
pub const DATA_SOURCE_COLUMN: &str = "DataSource";

/// Looks up the rows of one table matching an identity value.
#[async_trait]
pub trait RowLookup: Send {
    async fn lookup(&mut self, id: &str) -> Result<RowSet>;
}

/// `SELECT *` of the rows whose `column` equals `id`.
///
/// [`NULL_CELL`] looks up `IS NULL`. Other values are quoted as string
/// literals for the engine's dialect.
pub fn lookup_sql(db_type: DbType, table: &str, column: &str, id: &str) -> String {
    if id == NULL_CELL {
        return format!("SELECT * FROM {} WHERE {} IS NULL", table, column);
    }
    let escaped = match db_type {
        DbType::Mysql => id.replace('\\', "\\\\").replace('\'', "''"),
        DbType::Sqlite => id.replace('\'', "''"),
    };
    format!("SELECT * FROM {} WHERE {} = '{}'", table, column, escaped)
}

/// Identity lookups through a data source connection.
pub struct TableLookup {
    connection: Connection,
    table: String,
    column: String,
    key: String,
}

impl TableLookup {
    pub fn new(
        connection: Connection,
        table: impl Into<String>,
        column: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            table: table.into(),
            column: column.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl RowLookup for TableLookup {
    async fn lookup(&mut self, id: &str) -> Result<RowSet> {
        let sql = lookup_sql(self.connection.db_type(), &self.table, &self.column, id);
        self.connection
            .query_rows(&sql)
            .await
            .map_err(|e| DsdiffError::query(&self.table, &self.key, e))
    }
}

/// Lines produced for one data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowDiffSection {
    pub data_source_key: String,
    /// Report lines, each starting with the data source key.
    pub lines: Vec<Row>,
    /// Base rows looked up.
    pub rows_checked: u64,
    pub no_data: usize,
    pub duplicated: usize,
    pub changed: usize,
}

/// A `<key>, <id>, <tip>...` line spanning `width` base columns.
pub fn tip_row(key: &str, width: usize, id: &str, tip: &str) -> Row {
    let mut row = Vec::with_capacity(width + 1);
    row.push(key.to_string());
    row.push(id.to_string());
    row.extend((1..width).map(|_| tip.to_string()));
    row
}

/// Annotate a target row against its base row.
///
/// Returns `None` when all unmasked cells agree. Otherwise the identity
/// cell is kept, changed cells read `target [base]` and the rest are empty.
pub fn annotate_row(base: &Row, target: &Row, skip: &[bool]) -> Option<Row> {
    diff_row(base, target, skip)?;

    let width = base.len().max(target.len());
    let cells = (0..width)
        .map(|i| {
            let b = base.get(i).map(String::as_str).unwrap_or_default();
            let t = target.get(i).map(String::as_str).unwrap_or_default();
            let skipped = skip.get(i).copied().unwrap_or(false);
            if i == 0 {
                b.to_string()
            } else if b == t || skipped {
                String::new()
            } else {
                format!("{} [{}]", t, b)
            }
        })
        .collect();
    Some(cells)
}

/// Look up every base row on one data source.
///
/// The cancellation token is checked before every lookup.
pub async fn diff_rows<L: RowLookup>(
    lookup: &mut L,
    base: &BaseTable,
    key: &str,
    cancel: &CancellationToken,
) -> Result<RowDiffSection> {
    let width = base.columns.len();
    let mut section = RowDiffSection {
        data_source_key: key.to_string(),
        ..Default::default()
    };

    for row in base.index.rows() {
        if cancel.is_cancelled() {
            return Err(DsdiffError::Cancelled);
        }
        let Some(id) = row.first() else {
            continue;
        };
        section.rows_checked += 1;

        let found = lookup.lookup(id).await?;
        match found.rows.as_slice() {
            [] => {
                section.no_data += 1;
                section.lines.push(tip_row(key, width, id, NO_DATA));
            }
            [target] => {
                if let Some(cells) = annotate_row(row, target, &base.skip) {
                    section.changed += 1;
                    let mut line = Vec::with_capacity(cells.len() + 1);
                    line.push(key.to_string());
                    line.extend(cells);
                    section.lines.push(line);
                }
            }
            _ => {
                section.duplicated += 1;
                section.lines.push(tip_row(key, width, id, DUPLICATED_DATA));
            }
        }
    }

    debug!(
        "{}: {} rows looked up at {} ({} missing, {} duplicated, {} changed)",
        base.table,
        section.rows_checked,
        key,
        section.no_data,
        section.duplicated,
        section.changed
    );
    Ok(section)
}

/// Outcome for one data source of a row diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowDiffTarget {
    pub data_source_key: String,
    pub rows_checked: u64,
    pub no_data: usize,
    pub duplicated: usize,
    pub changed: usize,
    /// Set when the lookups failed and the lines were discarded.
    pub error: Option<String>,
}

impl RowDiffTarget {
    fn from_section(section: &RowDiffSection) -> Self {
        Self {
            data_source_key: section.data_source_key.clone(),
            rows_checked: section.rows_checked,
            no_data: section.no_data,
            duplicated: section.duplicated,
            changed: section.changed,
            error: None,
        }
    }
}

/// Result of a row diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDiffSummary {
    pub table: String,
    /// Key of the base data source.
    pub base: String,
    pub targets: Vec<RowDiffTarget>,
    pub output: PathBuf,
}

impl RowDiffSummary {
    /// True when the lookups failed on some data source.
    pub fn has_failures(&self) -> bool {
        self.targets.iter().any(|t| t.error.is_some())
    }

    /// Lines written, tips included.
    pub fn lines(&self) -> usize {
        self.targets
            .iter()
            .map(|t| t.no_data + t.duplicated + t.changed)
            .sum()
    }
}

/// Runs a row diff of one table over a connected pool.
pub struct RowDiffReport<'a> {
    pool: &'a ConnectionPool,
    executor: &'a JobExecutor<Job>,
    base_index: usize,
    skip_columns: Vec<String>,
    output_dir: PathBuf,
}

impl<'a> RowDiffReport<'a> {
    pub fn new(
        pool: &'a ConnectionPool,
        executor: &'a JobExecutor<Job>,
        base_index: usize,
        skip_columns: Vec<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            executor,
            base_index,
            skip_columns,
            output_dir: output_dir.into(),
        }
    }

    /// Load `table` from the base data source and look up each of its rows
    /// on every data source, each on its own lane.
    ///
    /// A data source whose lookups fail is recorded in the summary and its
    /// lines are discarded. Loading the base, report I/O and cancellation
    /// end the run with an error.
    pub async fn run(&self, table: &str) -> Result<RowDiffSummary> {
        let (Some(base_connection), Some(base_source)) = (
            self.pool.connection(self.base_index),
            self.pool.source(self.base_index),
        ) else {
            return Err(DsdiffError::Config(format!(
                "base index {} out of range ({} data sources)",
                self.base_index,
                self.pool.len()
            )));
        };
        let base_key = base_source.key();

        info!("Loading BASE data: {} from {}", table, base_key);
        let job = QueryJob::select_all(base_connection.clone(), &base_key, table);
        let mut ticket = self.executor.submit(Job::Query(job), self.base_index).await?;
        let base_rows = ticket.wait().await.and_then(JobOutput::into_rows)?;
        let Some(column) = base_rows.columns.first().cloned() else {
            return Err(DsdiffError::query(table, &base_key, "table has no columns"));
        };

        let path = self.output_dir.join(format!("diff-{}.csv", table));
        let mut writer = ReportWriter::open(path)?;
        let header: Row = std::iter::once(DATA_SOURCE_COLUMN.to_string())
            .chain(base_rows.columns.iter().cloned())
            .collect();
        writer.write_rows(&[header])?;

        let base = Arc::new(BaseTable::new(table, base_rows, &self.skip_columns));
        let total = self.pool.len();
        let mut pending: Vec<(String, JobTicket<JobOutput>)> = Vec::with_capacity(total);
        for lane in 0..total {
            let (Some(connection), Some(source)) = (self.pool.connection(lane), self.pool.source(lane))
            else {
                continue;
            };
            let job = RowDiffJob {
                connection: connection.clone(),
                key: source.key(),
                column: column.clone(),
                base: base.clone(),
                ordinal: (lane + 1, total),
            };
            let key = job.key.clone();
            pending.push((key, self.executor.submit(Job::RowDiff(job), lane).await?));
        }

        let mut targets = Vec::with_capacity(pending.len());
        for (key, mut ticket) in pending {
            match ticket.wait().await.and_then(JobOutput::into_lines) {
                Ok(section) => {
                    writer.write_rows(&section.lines)?;
                    targets.push(RowDiffTarget::from_section(&section));
                }
                Err(DsdiffError::Cancelled) => return Err(DsdiffError::Cancelled),
                Err(e) => {
                    error!("Row diff of {} at {} failed, its lines are discarded: {}", table, key, e);
                    targets.push(RowDiffTarget {
                        data_source_key: key,
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }

        let output = writer.finish()?;
        info!("Saved to csv file: {}", output.display());
        Ok(RowDiffSummary {
            table: table.to_string(),
            base: base_key,
            targets,
            output,
        })
    }
}
