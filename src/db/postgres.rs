//! PostgreSQL source client.
//!
//! Values are converted by column type. Types JSON has no native form for
//! (decimals, dates, times, intervals, UUIDs, network addresses) are rendered
//! as strings; `bytea` as base64. One-dimensional arrays become JSON arrays.

use super::types::{bytes_value, float_value};
use super::{JsonRow, SourceClient};
use crate::error::{ForwarderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgConnection, PgHasArrayType, PgRow, Postgres};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::BigDecimal;
use sqlx::{Column, Connection, Decode, Row, Type, TypeInfo, ValueRef};
use tracing::warn;
use uuid::Uuid;

/// `lc_monetary` is not visible to the client; two digits covers the common locales.
const MONEY_FRACTION_DIGITS: i64 = 2;

/// A transient connection to a tenant's PostgreSQL database.
#[derive(Debug)]
pub struct PostgresSource {
    conn: PgConnection,
}

impl PostgresSource {
    /// Opens a single connection (no pool; the connection lives for one run).
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(map_connection_error)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SourceClient for PostgresSource {
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

/// Converts a PgRow to a JSON object.
fn convert_row(row: &PgRow) -> JsonRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            (
                col.name().to_string(),
                convert_value(row, i, col.name(), col.type_info().name()),
            )
        })
        .collect()
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Decodes a one-dimensional array, converting each element with `to_json`.
fn array<T>(row: &PgRow, index: usize, to_json: impl Fn(T) -> JsonValue) -> Option<JsonValue>
where
    T: for<'a> Decode<'a, Postgres> + Type<Postgres> + PgHasArrayType,
{
    let items = get::<Vec<Option<T>>>(row, index)?;
    Some(
        items
            .into_iter()
            .map(|item| item.map(&to_json).unwrap_or(JsonValue::Null))
            .collect(),
    )
}

/// Converts a single column value from a PgRow to JSON.
fn convert_value(row: &PgRow, index: usize, column: &str, type_name: &str) -> JsonValue {
    if row.try_get_raw(index).map(|v| v.is_null()).unwrap_or(true) {
        return JsonValue::Null;
    }

    let upper = type_name.to_uppercase();
    let value = match upper.strip_suffix("[]") {
        Some(element) => array_value(row, index, element),
        None => scalar_value(row, index, &upper),
    };

    value.unwrap_or_else(|| {
        warn!("Cannot convert column '{column}' of type {type_name}; sending null");
        JsonValue::Null
    })
}

fn scalar_value(row: &PgRow, index: usize, type_name: &str) -> Option<JsonValue> {
    match type_name {
        "BOOL" => get::<bool>(row, index).map(JsonValue::Bool),
        "INT2" => get::<i16>(row, index).map(JsonValue::from),
        "INT4" => get::<i32>(row, index).map(JsonValue::from),
        "INT8" => get::<i64>(row, index).map(JsonValue::from),
        "OID" => get::<Oid>(row, index).map(|v| JsonValue::from(v.0)),
        "FLOAT4" => get::<f32>(row, index).map(|v| float_value(f64::from(v))),
        "FLOAT8" => get::<f64>(row, index).map(float_value),
        // Exact decimals keep their scale as text: AVG() of 1 and 2 is "1.5000000000000000".
        "NUMERIC" => get::<BigDecimal>(row, index).map(string_json),
        "MONEY" => get::<PgMoney>(row, index)
            .map(|v| string_json(v.to_bigdecimal(MONEY_FRACTION_DIGITS))),
        "JSON" | "JSONB" => get::<JsonValue>(row, index),
        "UUID" => get::<Uuid>(row, index).map(string_json),
        "DATE" => get::<NaiveDate>(row, index).map(string_json),
        "TIME" => get::<NaiveTime>(row, index).map(string_json),
        "TIMETZ" => get::<PgTimeTz<NaiveTime, FixedOffset>>(row, index)
            .map(|v| JsonValue::String(format!("{}{}", v.time, v.offset))),
        "TIMESTAMP" => get::<NaiveDateTime>(row, index).map(timestamp_json),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index).map(timestamptz_json),
        "INTERVAL" => {
            get::<PgInterval>(row, index).map(|v| JsonValue::String(interval_iso8601(&v)))
        }
        "INET" => get::<IpNetwork>(row, index).map(inet_json),
        "CIDR" => get::<IpNetwork>(row, index).map(string_json),
        "BYTEA" => get::<Vec<u8>>(row, index).map(|v| bytes_value(&v)),
        _ => get::<String>(row, index).map(JsonValue::String),
    }
}

fn array_value(row: &PgRow, index: usize, element: &str) -> Option<JsonValue> {
    match element {
        "BOOL" => array::<bool>(row, index, JsonValue::Bool),
        "INT2" => array::<i16>(row, index, JsonValue::from),
        "INT4" => array::<i32>(row, index, JsonValue::from),
        "INT8" => array::<i64>(row, index, JsonValue::from),
        "FLOAT4" => array::<f32>(row, index, |v| float_value(f64::from(v))),
        "FLOAT8" => array::<f64>(row, index, float_value),
        "NUMERIC" => array::<BigDecimal>(row, index, string_json),
        "UUID" => array::<Uuid>(row, index, string_json),
        "DATE" => array::<NaiveDate>(row, index, string_json),
        "TIMESTAMP" => array::<NaiveDateTime>(row, index, timestamp_json),
        "TIMESTAMPTZ" => array::<DateTime<Utc>>(row, index, timestamptz_json),
        _ => array::<String>(row, index, JsonValue::String),
    }
}

fn string_json<T: ToString>(value: T) -> JsonValue {
    JsonValue::String(value.to_string())
}

fn timestamp_json(value: NaiveDateTime) -> JsonValue {
    JsonValue::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn timestamptz_json(value: DateTime<Utc>) -> JsonValue {
    JsonValue::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Hosts print without a prefix length, as `psql` shows them.
fn inet_json(value: IpNetwork) -> JsonValue {
    let host_prefix = if value.is_ipv4() { 32 } else { 128 };
    if value.prefix() == host_prefix {
        string_json(value.ip())
    } else {
        string_json(value)
    }
}

/// Renders an interval as an ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
///
/// Postgres keeps months, days and microseconds separately, and so does this.
fn interval_iso8601(interval: &PgInterval) -> String {
    let mut out = String::from("P");

    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        out.push_str(&format!("{years}Y"));
    }
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    if interval.days != 0 {
        out.push_str(&format!("{}D", interval.days));
    }

    if interval.microseconds != 0 {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let hours = micros / 3_600_000_000;
        let minutes = (micros / 60_000_000) % 60;
        let seconds = (micros / 1_000_000) % 60;
        let fraction = micros % 1_000_000;

        out.push('T');
        if hours != 0 {
            out.push_str(&format!("{sign}{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{sign}{minutes}M"));
        }
        if fraction != 0 {
            let fraction = format!("{fraction:06}");
            out.push_str(&format!("{sign}{seconds}.{}S", fraction.trim_end_matches('0')));
        } else if seconds != 0 {
            out.push_str(&format!("{sign}{seconds}S"));
        }
    }

    if out == "P" {
        out.push_str("T0S");
    }
    out
}

/// Maps sqlx connection errors to readable messages.
fn map_connection_error(error: sqlx::Error) -> ForwarderError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        ForwarderError::query(format!(
            "Cannot connect to source database. Check that the server is running. ({error})"
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        ForwarderError::query("Authentication failed for the source database.")
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        ForwarderError::query(format!("Source database does not exist. ({error})"))
    } else {
        ForwarderError::query(format!("Cannot connect to source database: {error}"))
    }
}

/// Formats a query error with detail and hint when Postgres provides them.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
