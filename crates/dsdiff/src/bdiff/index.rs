//! Base row index and per-target match tracking.

use crate::convert::Row;
use std::collections::HashMap;

/// Base rows keyed by identity value (`row[0]`).
///
/// Entries keep the order in which an identity first appeared. A later row
/// with the same identity replaces the earlier one in place.
#[derive(Debug, Clone, Default)]
pub struct RowIndex {
    rows: Vec<Row>,
    positions: HashMap<String, usize>,
}

impl RowIndex {
    /// Build the index from base rows.
    pub fn build(rows: Vec<Row>) -> Self {
        let mut index = Self {
            rows: Vec::with_capacity(rows.len()),
            positions: HashMap::with_capacity(rows.len()),
        };
        for row in rows {
            let key = identity(&row).to_string();
            match index.positions.get(&key) {
                Some(&pos) => index.rows[pos] = row,
                None => {
                    index.positions.insert(key, index.rows.len());
                    index.rows.push(row);
                }
            }
        }
        index
    }

    /// Look up a row by identity value, returning its position too.
    pub fn get(&self, key: &str) -> Option<(usize, &Row)> {
        self.positions.get(key).map(|&pos| (pos, &self.rows[pos]))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Number of distinct identity values.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in index order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Identity value of a row. A row without cells has the empty identity.
pub fn identity(row: &Row) -> &str {
    row.first().map(String::as_str).unwrap_or("")
}

/// Which base rows one target has matched.
#[derive(Debug, Clone)]
pub struct MatchSet {
    matched: Vec<bool>,
}

impl MatchSet {
    /// Fresh set with nothing matched.
    pub fn new(index: &RowIndex) -> Self {
        Self {
            matched: vec![false; index.len()],
        }
    }

    pub fn mark(&mut self, pos: usize) {
        if let Some(flag) = self.matched.get_mut(pos) {
            *flag = true;
        }
    }

    pub fn is_matched(&self, pos: usize) -> bool {
        self.matched.get(pos).copied().unwrap_or(false)
    }

    /// Number of matched base rows.
    pub fn matched_count(&self) -> usize {
        self.matched.iter().filter(|m| **m).count()
    }

    /// Unmatched base rows in index order.
    pub fn unmatched<'a>(&'a self, index: &'a RowIndex) -> impl Iterator<Item = &'a Row> + 'a {
        index
            .rows()
            .iter()
            .zip(self.matched.iter())
            .filter(|(_, matched)| !**matched)
            .map(|(row, _)| row)
    }
}
