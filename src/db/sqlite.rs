//! SQLite source client.
//!
//! SQLite is dynamically typed, so values are converted according to the
//! storage class of each value rather than the declared column type.

use super::types::{bytes_value, float_value};
use super::{JsonRow, SourceClient};
use crate::error::{ForwarderError, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};

/// A transient connection to a tenant's SQLite database.
#[derive(Debug)]
pub struct SqliteSource {
    conn: SqliteConnection,
}

impl SqliteSource {
    /// Opens a connection. The database file must already exist.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = SqliteConnection::connect(url)
            .await
            .map_err(|e| ForwarderError::query(format!("Cannot open SQLite database: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SourceClient for SqliteSource {
    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| ForwarderError::query(format_query_error(e)))?;

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.conn
            .close()
            .await
            .map_err(|e| ForwarderError::query(format!("Failed to close connection: {e}")))
    }
}

/// Converts a SqliteRow to a JSON object.
fn convert_row(row: &SqliteRow) -> JsonRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), convert_value(row, i)))
        .collect()
}

/// Converts a single value by its storage class.
fn convert_value(row: &SqliteRow, index: usize) -> JsonValue {
    let storage_class = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return JsonValue::Null,
    };

    match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(index)
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),

        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(float_value)
            .unwrap_or(JsonValue::Null),

        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|b| bytes_value(&b))
            .unwrap_or(JsonValue::Null),

        // TEXT, NUMERIC and the date/time affinities all read back as text
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}

fn format_query_error(error: sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => format!("ERROR: {}", db_error.message()),
        None => error.to_string(),
    }
}
