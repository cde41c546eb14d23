//! Database-agnostic row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. A generic decoder extracts a [`Value`] for the category, falling back through
//!    the other representations when the driver refuses the first guess.

use serde_json::Value as JsonValue;
use sqlx::{Column, ColumnIndex, Decode, Type, TypeInfo};
use std::sync::Arc;

use crate::models::{DatabaseType, ExecResult, Row, Value};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // SQLite's NUMERIC affinity is a float; everywhere else keep exact text
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Text;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // MySQL reports BOOLEAN columns as TINYINT(1); those stay integers
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

/// Column names of a row, shared by every row of the result set.
pub(crate) fn column_names<R: sqlx::Row>(row: &R) -> Arc<[String]> {
    row.columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into()
}

/// Decode all rows of a result set.
pub(crate) fn decode_rows<R>(rows: &[R], db: DatabaseType) -> Vec<Row>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i32: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i16: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f32: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> bool: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> JsonValue: Decode<'r, R::Database> + Type<R::Database>,
{
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns = column_names(first);
    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|idx| decode_column(row, idx, db))
                .collect();
            Row::new(Arc::clone(&columns), values)
        })
        .collect()
}

fn decode_column<R>(row: &R, idx: usize, db: DatabaseType) -> Value
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i32: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i16: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f32: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> bool: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> JsonValue: Decode<'r, R::Database> + Type<R::Database>,
{
    let type_info = row.columns()[idx].type_info();
    let category = if type_info.is_null() {
        TypeCategory::Null
    } else {
        categorize_type(type_info.name(), db)
    };

    // A NULL column type only means the driver could not infer one (e.g. SQLite
    // expressions); the value itself decides
    let decoded = match category {
        TypeCategory::Null => None,
        TypeCategory::Integer => try_integer(row, idx),
        TypeCategory::Float => try_float(row, idx),
        TypeCategory::Boolean => try_value::<bool, R>(row, idx, Value::Bool),
        TypeCategory::Json => try_value::<JsonValue, R>(row, idx, Value::Json),
        TypeCategory::Binary => try_value::<Vec<u8>, R>(row, idx, Value::Bytes),
        TypeCategory::Text => try_value::<String, R>(row, idx, Value::Text),
    };

    decoded
        .or_else(|| try_value::<String, R>(row, idx, Value::Text))
        .or_else(|| try_integer(row, idx))
        .or_else(|| try_float(row, idx))
        .or_else(|| try_value::<Vec<u8>, R>(row, idx, Value::Bytes))
        .unwrap_or_else(|| {
            tracing::warn!(
                column = %row.columns()[idx].name(),
                type_name = %type_info.name(),
                "Unsupported column type, decoded as NULL"
            );
            Value::Null
        })
}

/// `Some(Value::Null)` for SQL NULL, `Some(v)` on success, `None` when `T` does not fit.
fn try_value<T, R>(row: &R, idx: usize, wrap: fn(T) -> Value) -> Option<Value>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> T: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(wrap(v)),
        Ok(None) => Some(Value::Null),
        Err(_) => None,
    }
}

fn try_integer<R>(row: &R, idx: usize) -> Option<Value>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i32: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i16: Decode<'r, R::Database> + Type<R::Database>,
{
    try_value::<i64, R>(row, idx, Value::Int)
        .or_else(|| try_value::<i32, R>(row, idx, |v| Value::Int(v.into())))
        .or_else(|| try_value::<i16, R>(row, idx, |v| Value::Int(v.into())))
}

fn try_float<R>(row: &R, idx: usize) -> Option<Value>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f32: Decode<'r, R::Database> + Type<R::Database>,
{
    try_value::<f64, R>(row, idx, Value::Float)
        .or_else(|| try_value::<f32, R>(row, idx, |v| Value::Float(v.into())))
}

impl From<sqlx::mysql::MySqlQueryResult> for ExecResult {
    fn from(result: sqlx::mysql::MySqlQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id()).ok(),
        }
    }
}

impl From<sqlx::postgres::PgQueryResult> for ExecResult {
    fn from(result: sqlx::postgres::PgQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        }
    }
}

impl From<sqlx::sqlite::SqliteQueryResult> for ExecResult {
    fn from(result: sqlx::sqlite::SqliteQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        }
    }
}
