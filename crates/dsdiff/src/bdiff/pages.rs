//! Paginated reads of a target table.

use super::classify::{BaseTable, TargetComparison, TargetSection};
use crate::convert::RowSet;
use crate::error::{DsdiffError, Result};
use crate::pool::Connection;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Source of result pages for one table.
#[async_trait]
pub trait PageSource: Send {
    /// Fetch up to `limit` rows starting at `offset`; `None` fetches all rows.
    async fn fetch_page(&mut self, limit: Option<u64>, offset: u64) -> Result<RowSet>;
}

/// `SELECT *` for one page of a table.
pub fn page_sql(table: &str, limit: Option<u64>, offset: u64) -> String {
    match limit {
        Some(limit) => format!("SELECT * FROM {} LIMIT {} OFFSET {}", table, limit, offset),
        None => format!("SELECT * FROM {}", table),
    }
}

/// Pages of a table read through a data source connection.
pub struct TablePages {
    connection: Connection,
    table: String,
    key: String,
}

impl TablePages {
    pub fn new(connection: Connection, table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            connection,
            table: table.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl PageSource for TablePages {
    async fn fetch_page(&mut self, limit: Option<u64>, offset: u64) -> Result<RowSet> {
        let sql = page_sql(&self.table, limit, offset);
        self.connection
            .query_rows(&sql)
            .await
            .map_err(|e| DsdiffError::query(&self.table, &self.key, e))
    }
}

/// Compare every page of a target table against the base.
///
/// A `batch_size` of 0 reads the table in a single page. Pagination stops
/// at the first empty page or at a column mismatch. The cancellation token
/// is checked before every page.
pub async fn compare_target<P: PageSource>(
    pages: &mut P,
    base: &BaseTable,
    key: &str,
    batch_size: u64,
    cancel: &CancellationToken,
) -> Result<TargetSection> {
    let limit = (batch_size > 0).then_some(batch_size);
    let mut comparison = TargetComparison::new(base, key);
    let mut offset = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(DsdiffError::Cancelled);
        }

        let page = pages.fetch_page(limit, offset).await?;
        if !comparison.check_columns(&page.columns) {
            debug!("{}: column mismatch at {}", base.table, key);
            break;
        }
        if page.is_empty() {
            break;
        }

        debug!(
            "{}: classifying {} rows at offset {} from {}",
            base.table,
            page.len(),
            offset,
            key
        );
        comparison.classify_page(page.rows);

        match limit {
            Some(limit) => offset += limit,
            None => break,
        }
    }

    Ok(comparison.finish())
}
