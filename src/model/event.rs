//! Row and DDL change events
//!
//! These are the upstream events the redo log persists. Column values are
//! kept as JSON values; the redo log does not interpret them.

use serde::{Deserialize, Serialize};

use super::span::Ts;

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
    pub table_id: i64,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, table_id: i64) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            table_id,
        }
    }

    /// Table reference carrying only an id.
    pub fn from_id(table_id: i64) -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            table_id,
        }
    }
}

/// A single column value of a row image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: serde_json::Value,
}

impl Column {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A row-level change.
///
/// Inserts carry only `columns`, deletes only `pre_columns`, updates both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChangedEvent {
    pub start_ts: Ts,
    pub commit_ts: Ts,
    pub table: TableName,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub pre_columns: Vec<Column>,
}

impl RowChangedEvent {
    /// Row change with no column images, identified by table and commit ts.
    pub fn new(commit_ts: Ts, table: TableName) -> Self {
        Self {
            start_ts: 0,
            commit_ts,
            table,
            columns: Vec::new(),
            pre_columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_pre_columns(mut self, pre_columns: Vec<Column>) -> Self {
        self.pre_columns = pre_columns;
        self
    }

    pub fn with_start_ts(mut self, start_ts: Ts) -> Self {
        self.start_ts = start_ts;
        self
    }
}

/// A schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlEvent {
    pub start_ts: Ts,
    pub commit_ts: Ts,
    pub query: String,
    #[serde(default)]
    pub table: Option<TableName>,
}

impl DdlEvent {
    pub fn new(start_ts: Ts, commit_ts: Ts, query: impl Into<String>) -> Self {
        Self {
            start_ts,
            commit_ts,
            query: query.into(),
            table: None,
        }
    }

    pub fn with_table(mut self, table: TableName) -> Self {
        self.table = Some(table);
        self
    }
}
