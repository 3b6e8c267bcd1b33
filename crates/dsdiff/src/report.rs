//! Per-table CSV reports.
//!
//! Row diff reports reuse the same writer through [`ReportWriter::open`] and
//! [`ReportWriter::write_rows`].
//!
//! A report file holds one header row (`<base columns>, Table, DataSource,
//! Type, SQL`) followed by one row per [`DiffRecord`]. `DIFF_TABLE` rows carry
//! the target's column list, so rows do not all have the header's width.

use crate::bdiff::DiffRecord;
use crate::convert::Row;
use crate::error::{DsdiffError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Trailing header columns after the base columns.
pub const REPORT_COLUMNS: [&str; 4] = ["Table", "DataSource", "Type", "SQL"];

/// Writer for one table's report.
pub struct ReportWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    records: u64,
}

impl ReportWriter {
    /// Create (or truncate) `<dir>/<table>.csv`, creating `dir` if needed.
    pub fn create(dir: &Path, table: &str) -> Result<Self> {
        Self::open(dir.join(format!("{}.csv", table)))
    }

    /// Create (or truncate) the report at `path`, creating its directory.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| DsdiffError::report(dir.display().to_string(), e))?;
        }
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| DsdiffError::report(path.display().to_string(), e))?;
        debug!("opened report {}", path.display());
        Ok(Self {
            path,
            writer,
            records: 0,
        })
    }

    /// Report file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Write the header row.
    pub fn write_header(&mut self, base_columns: &[String]) -> Result<()> {
        let header = base_columns
            .iter()
            .map(String::as_str)
            .chain(REPORT_COLUMNS);
        self.writer
            .write_record(header)
            .map_err(|e| self.error(e))?;
        self.flush()
    }

    /// Write all records of one target section and flush them to disk.
    pub fn write_section(&mut self, records: &[DiffRecord]) -> Result<()> {
        for record in records {
            self.writer
                .write_record(record.csv_fields())
                .map_err(|e| self.error(e))?;
            self.records += 1;
        }
        self.flush()
    }

    /// Write plain rows and flush them to disk.
    pub fn write_rows(&mut self, rows: &[Row]) -> Result<()> {
        for row in rows {
            self.writer.write_record(row).map_err(|e| self.error(e))?;
            self.records += 1;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.error(e))
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.flush()?;
        Ok(self.path)
    }

    fn error(&self, e: impl ToString) -> DsdiffError {
        DsdiffError::report(self.path.display().to_string(), e)
    }
}
