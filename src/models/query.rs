//! Statement result models.
//!
//! This module defines the rows, results and options exchanged through the
//! command surface.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::models::Value;

/// A decoded result row. Column names are shared by every row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a column value by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.clone(), v.to_json()))
            .collect()
    }

    /// Deserialize the row into a struct keyed by column name.
    pub fn decode<T: DeserializeOwned>(&self) -> DbResult<T> {
        serde_json::from_value(JsonValue::Object(self.to_json_map()))
            .map_err(|e| DbError::internal(format!("Failed to decode row: {}", e)))
    }
}

/// A fully fetched result set.
///
/// Column names are taken from the first row, so an empty result has no columns.
/// Use [`crate::Command::prepare`] when the shape of an empty result matters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    /// Names of the first row's columns; empty when no row came back.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Rows {
    pub fn new(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Result of a single-row query. The error, if any, is only surfaced when the
/// caller inspects it.
#[derive(Debug)]
pub struct RowResult(DbResult<Row>);

impl RowResult {
    pub fn new(result: DbResult<Row>) -> Self {
        Self(result)
    }

    pub fn err(&self) -> Option<&DbError> {
        self.0.as_ref().err()
    }

    pub fn into_result(self) -> DbResult<Row> {
        self.0
    }

    pub fn decode<T: DeserializeOwned>(self) -> DbResult<T> {
        self.0?.decode()
    }
}

impl From<DbResult<Row>> for RowResult {
    fn from(result: DbResult<Row>) -> Self {
        Self(result)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Only reported by MySQL and SQLite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

/// A statement validated by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// Result column names, empty for statements that return nothing.
    pub columns: Vec<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            columns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for `begin_with`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    #[serde(default)]
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_default(&self) -> bool {
        self.isolation.is_none() && !self.read_only
    }

    /// `SET TRANSACTION` statement applying these options, if any are set.
    pub fn set_transaction_sql(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(level) = self.isolation {
            parts.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            parts.push("READ ONLY".to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", parts.join(", ")))
        }
    }
}
