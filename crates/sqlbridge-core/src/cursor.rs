//! Buffered statement results.

use std::sync::Arc;

use crate::row::{ColumnInfo, Row};
use crate::value::Value;

/// The result of one executed statement.
///
/// Result sets are read fully off the wire before the cursor is handed out,
/// so fetching never touches the connection. Statements without a result set
/// (INSERT, UPDATE, SET ...) produce an empty cursor carrying the affected
/// row count and last insert id.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
    position: usize,
    affected_rows: u64,
    insert_id: u64,
}

impl Cursor {
    /// Build a cursor over a result set.
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        let rows = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values))
            .collect();
        Self {
            columns,
            rows,
            position: 0,
            affected_rows: 0,
            insert_id: 0,
        }
    }

    /// Build the cursor of a statement that returned no result set.
    pub fn from_ok(affected_rows: u64, insert_id: u64) -> Self {
        Self {
            affected_rows,
            insert_id,
            ..Self::default()
        }
    }

    /// Attach OK-packet counters to a result-set cursor.
    #[must_use]
    pub fn with_counts(mut self, affected_rows: u64, insert_id: u64) -> Self {
        self.affected_rows = affected_rows;
        self.insert_id = insert_id;
        self
    }

    /// Whether the statement produced a result set (possibly empty).
    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        self.columns.names()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn insert_id(&self) -> u64 {
        self.insert_id
    }

    /// Next unread row, advancing the read position.
    pub fn fetch_row(&mut self) -> Option<&Row> {
        let row = self.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }

    /// All rows not yet read.
    pub fn fetch_all(&mut self) -> &[Row] {
        let start = self.position.min(self.rows.len());
        self.position = self.rows.len();
        &self.rows[start..]
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
