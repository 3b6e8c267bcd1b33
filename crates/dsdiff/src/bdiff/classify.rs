//! Row classification of one target against the base.

use super::index::{identity, MatchSet, RowIndex};
use super::record::{DiffKind, DiffRecord, BASE_KEY};
use crate::convert::{Row, RowSet, NULL_CELL};
use serde::Serialize;
use std::collections::HashMap;

/// Cell written in place of values that agree with the base.
pub const MASK_CELL: &str = "/";

/// Base side of a table comparison, shared by all targets.
#[derive(Debug, Clone)]
pub struct BaseTable {
    pub table: String,
    pub columns: Vec<String>,
    pub index: RowIndex,
    /// `skip[i]` excludes column `i` from equality checks.
    pub skip: Vec<bool>,
}

impl BaseTable {
    /// Index the base rows and resolve skip column names to positions.
    pub fn new(table: impl Into<String>, base: RowSet, skip_columns: &[String]) -> Self {
        let skip = skip_mask(&base.columns, skip_columns);
        Self {
            table: table.into(),
            index: RowIndex::build(base.rows),
            columns: base.columns,
            skip,
        }
    }

    /// Positions masked by skip columns.
    pub fn skipped_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.skip)
            .filter(|(_, skip)| **skip)
            .map(|(c, _)| c.as_str())
            .collect()
    }
}

/// Records produced for one target of one table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetSection {
    pub data_source_key: String,
    pub records: Vec<DiffRecord>,
    /// Pages fetched from the target.
    pub pages: u64,
    /// Target rows classified.
    pub rows_compared: u64,
    /// The target's column list differed from the base.
    pub schema_mismatch: bool,
}

impl TargetSection {
    /// Number of records of one kind.
    pub fn count(&self, kind: DiffKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

/// Map column names to a skip mask. Unknown names are ignored.
pub fn skip_mask(columns: &[String], skip_columns: &[String]) -> Vec<bool> {
    columns
        .iter()
        .map(|c| skip_columns.iter().any(|s| s == c))
        .collect()
}

/// Column lists match by name, order and arity.
pub fn same_columns(base: &[String], target: &[String]) -> bool {
    base == target
}

/// Compare a target row with its base row.
///
/// Returns `None` when all unmasked cells agree. Otherwise returns the
/// target row with agreeing and skipped cells replaced by [`MASK_CELL`];
/// the identity cell always carries the real value. Rows of different
/// arity differ as a whole and come back unmasked.
pub fn diff_row(base: &Row, target: &Row, skip: &[bool]) -> Option<Row> {
    if base.len() != target.len() {
        return Some(target.clone());
    }

    let mut same = true;
    let mut diff = Vec::with_capacity(target.len());
    for (i, (b, t)) in base.iter().zip(target).enumerate() {
        let skipped = skip.get(i).copied().unwrap_or(false);
        if b != t && !skipped {
            same = false;
            diff.push(t.clone());
        } else {
            diff.push(MASK_CELL.to_string());
        }
    }
    if same {
        return None;
    }
    if let (Some(first), Some(real)) = (diff.first_mut(), target.first()) {
        *first = real.clone();
    }
    Some(diff)
}

/// Build an `INSERT` statement that would recreate a row.
///
/// [`NULL_CELL`] becomes an unquoted `null`; every other cell is
/// single-quoted verbatim. Embedded quotes are not escaped.
pub fn generate_insert_sql(table: &str, columns: &[String], row: &Row) -> String {
    let values: Vec<String> = row
        .iter()
        .map(|cell| {
            if cell == NULL_CELL {
                "null".to_string()
            } else {
                format!("'{}'", cell)
            }
        })
        .collect();
    format!(
        "INSERT INTO {}({}) VALUES ({})",
        table,
        columns.join(","),
        values.join(",")
    )
}

/// Incremental comparison of one target against a [`BaseTable`].
///
/// Feed it the target's column list and pages in order, then call
/// [`finish`](Self::finish) to run the missing pass.
pub struct TargetComparison<'a> {
    base: &'a BaseTable,
    key: String,
    matches: MatchSet,
    section: TargetSection,
}

impl<'a> TargetComparison<'a> {
    pub fn new(base: &'a BaseTable, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            matches: MatchSet::new(&base.index),
            section: TargetSection {
                data_source_key: key.clone(),
                ..Default::default()
            },
            base,
            key,
        }
    }

    /// Check a page's column list against the base.
    ///
    /// On mismatch, records a single `DIFF_TABLE` and returns `false`; no
    /// further pages should be classified.
    pub fn check_columns(&mut self, columns: &[String]) -> bool {
        if self.section.schema_mismatch {
            return false;
        }
        if same_columns(&self.base.columns, columns) {
            return true;
        }
        self.section.schema_mismatch = true;
        self.push(DiffKind::DiffTable, columns.to_vec(), None);
        false
    }

    /// Classify one page of target rows.
    ///
    /// Within a page a later row with the same identity replaces an earlier
    /// one; survivors are classified in page order.
    pub fn classify_page(&mut self, rows: Vec<Row>) {
        self.section.pages += 1;

        let mut last: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            last.insert(identity(row), i);
        }
        let keep: Vec<bool> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| last.get(identity(row)) == Some(&i))
            .collect();

        for (row, keep) in rows.into_iter().zip(keep) {
            if keep {
                self.classify_row(row);
            }
        }
    }

    fn classify_row(&mut self, row: Row) {
        self.section.rows_compared += 1;
        let base = self.base;

        let Some((pos, base_row)) = base.index.get(identity(&row)) else {
            let sql = generate_insert_sql(&base.table, &base.columns, &row);
            self.push(DiffKind::Extra, row, Some(sql));
            return;
        };

        self.matches.mark(pos);
        if let Some(diff) = diff_row(base_row, &row, &base.skip) {
            self.section.records.push(DiffRecord {
                table: base.table.clone(),
                data_source_key: BASE_KEY.to_string(),
                kind: DiffKind::Diff,
                cells: base_row.clone(),
                sql: None,
            });
            self.push(DiffKind::Diff, diff, None);
        }
    }

    fn push(&mut self, kind: DiffKind, cells: Row, sql: Option<String>) {
        self.section.records.push(DiffRecord {
            table: self.base.table.clone(),
            data_source_key: self.key.clone(),
            kind,
            cells,
            sql,
        });
    }

    /// Emit unmatched base rows as `MISSING` and return the section.
    ///
    /// A section ended by a schema mismatch holds only its `DIFF_TABLE`.
    pub fn finish(mut self) -> TargetSection {
        if !self.section.schema_mismatch {
            let base = self.base;
            let missing: Vec<Row> = self.matches.unmatched(&base.index).cloned().collect();
            for row in missing {
                let sql = generate_insert_sql(&base.table, &base.columns, &row);
                self.push(DiffKind::Missing, row, Some(sql));
            }
        }
        self.section
    }
}
