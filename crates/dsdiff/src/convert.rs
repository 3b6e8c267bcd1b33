//! Conversion of driver rows into plain string rows.
//!
//! Every cell is carried as the database's own textual representation.
//! SQL `NULL` becomes the sentinel [`NULL_CELL`], so a real `NULL` and the
//! text `"NULL"` compare equal.

use crate::error::Result;
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// Sentinel stored in place of SQL `NULL`.
pub const NULL_CELL: &str = "NULL";

/// One result row; `row[0]` is the identity value used for diffing.
pub type Row = Vec<String>;

/// Column names plus rows of one result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Rows, each with the same arity as `columns`.
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Build a row set from nullable cells, mapping `None` to [`NULL_CELL`].
    pub fn from_cells(columns: Vec<String>, cells: Vec<Vec<Option<String>>>) -> Self {
        let rows = cells
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.unwrap_or_else(|| NULL_CELL.to_string()))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Convert driver rows. `columns` is used when `rows` is empty.
    pub fn from_rows<R: TextRow>(columns: Vec<String>, rows: &[R]) -> Result<Self> {
        let columns = match rows.first() {
            Some(first) => first.column_names(),
            None => columns,
        };
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let mut line = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                line.push(row.cell_text(i)?);
            }
            cells.push(line);
        }
        Ok(Self::from_cells(columns, cells))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first().and_then(|r| r.first()).map(String::as_str)
    }
}

/// A driver row whose cells can be read back as text.
pub trait TextRow {
    /// Column names of this row.
    fn column_names(&self) -> Vec<String>;

    /// Text of cell `index`; `None` for SQL `NULL`.
    fn cell_text(&self, index: usize) -> Result<Option<String>>;
}

impl TextRow for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    // Rows come from the text protocol (`raw_sql`), so every non-null value
    // is already the server's textual rendering.
    fn cell_text(&self, index: usize) -> Result<Option<String>> {
        if self.try_get_raw(index)?.is_null() {
            return Ok(None);
        }
        let bytes: Vec<u8> = self.try_get_unchecked(index)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl TextRow for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn cell_text(&self, index: usize) -> Result<Option<String>> {
        let raw = self.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(None);
        }
        let is_blob = raw.type_info().name() == "BLOB";
        if is_blob {
            let bytes: Vec<u8> = self.try_get_unchecked(index)?;
            return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
        }
        // SQLite renders INTEGER and REAL values itself
        let text: String = self.try_get_unchecked(index)?;
        Ok(Some(text))
    }
}
