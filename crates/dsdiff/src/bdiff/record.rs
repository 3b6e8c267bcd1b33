//! Diff record definitions.

use crate::convert::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data source key written for the base half of a `DIFF` pair.
pub const BASE_KEY: &str = "BASE";

/// Classification of one report record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    /// Row exists only in the target.
    Extra,
    /// Row exists only in the base.
    Missing,
    /// Row exists in both with different values.
    Diff,
    /// Target column list differs from the base.
    DiffTable,
}

impl DiffKind {
    /// Value of the `Type` report column.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffKind::Extra => "EXTRA",
            DiffKind::Missing => "MISSING",
            DiffKind::Diff => "DIFF",
            DiffKind::DiffTable => "DIFF_TABLE",
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a table report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub table: String,
    /// Data source the cells came from, or [`BASE_KEY`].
    pub data_source_key: String,
    pub kind: DiffKind,
    /// Row cells, or the target column list for `DIFF_TABLE`.
    pub cells: Row,
    /// Reconstructing `INSERT` for `EXTRA` and `MISSING` records.
    pub sql: Option<String>,
}

impl DiffRecord {
    /// Identity value of the record (`cells[0]`).
    pub fn identity(&self) -> Option<&str> {
        self.cells.first().map(String::as_str)
    }

    /// Fields of the CSV row: cells, then table, data source, type and SQL.
    pub fn csv_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.cells.iter().map(String::as_str).collect();
        fields.push(&self.table);
        fields.push(&self.data_source_key);
        fields.push(self.kind.as_str());
        fields.push(self.sql.as_deref().unwrap_or(""));
        fields
    }
}
