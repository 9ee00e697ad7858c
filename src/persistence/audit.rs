//! Audit log persistence.
//!
//! One row per forwarding run, written once and never updated. Row ids are
//! `AUTOINCREMENT`, so they only ever grow; readers polling for new rows can
//! rely on `id > last_seen`.

use super::Store;
use crate::db::QueryOutcome;
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::error::{ForwarderError, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::debug;

/// Everything captured about one run, ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub tenant_id: i64,
    pub query: QueryOutcome,
    pub request_method: String,
    pub request_url: String,
    /// Present only when delivery was attempted.
    pub delivery: Option<Delivery>,
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub timestamp: String,
    pub query_result: Option<String>,
    pub query_error: Option<String>,
    pub request_method: String,
    pub request_url: String,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_status_code: Option<i64>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub response_error: Option<String>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, tenant_id, timestamp, query_result, query_error, request_method,
           request_url, request_headers, request_body, response_status_code,
           response_headers, response_body, response_error
    FROM audit_log
"#;

/// Flattened column values for an insert.
struct Columns {
    query_result: Option<String>,
    query_error: Option<String>,
    request_headers: Option<String>,
    request_body: Option<String>,
    response_status_code: Option<i64>,
    response_headers: Option<String>,
    response_body: Option<String>,
    response_error: Option<String>,
}

impl Columns {
    fn from_record(record: &NewAuditRecord) -> Result<Self> {
        let (query_result, query_error) = match &record.query {
            QueryOutcome::Success(json) => (Some(json.clone()), None),
            QueryOutcome::Failed(error) => (None, Some(error.clone())),
        };

        let mut columns = Self {
            query_result,
            query_error,
            request_headers: None,
            request_body: None,
            response_status_code: None,
            response_headers: None,
            response_body: None,
            response_error: None,
        };

        if let Some(delivery) = &record.delivery {
            columns.request_headers = Some(to_json(&delivery.request.headers)?);
            columns.request_body = Some(delivery.request.body.clone());

            match &delivery.outcome {
                DeliveryOutcome::Completed(response) => {
                    columns.response_status_code = Some(i64::from(response.status));
                    columns.response_headers = Some(to_json(&response.headers)?);
                    columns.response_body = Some(response.body.clone());
                }
                DeliveryOutcome::Failed(error) => {
                    columns.response_error = Some(error.clone());
                }
            }
        }

        Ok(columns)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| ForwarderError::internal(format!("Failed to serialize headers: {e}")))
}

/// Current time in the fixed-width form stored in `audit_log.timestamp`.
///
/// Fixed width keeps lexical and chronological order identical.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Persists one audit record and returns its id.
///
/// The insert is committed before this returns. The stored timestamp never
/// goes backwards for a tenant, even if the wall clock does.
pub async fn record(store: &Store, record: &NewAuditRecord) -> Result<i64> {
    let columns = Columns::from_record(record)?;
    let mut tx = store.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_log
        (tenant_id, timestamp, query_result, query_error, request_method, request_url,
         request_headers, request_body, response_status_code, response_headers,
         response_body, response_error)
        VALUES (
            ?,
            MAX(?, COALESCE((SELECT MAX(timestamp) FROM audit_log WHERE tenant_id = ?), '')),
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        )
        "#,
    )
    .bind(record.tenant_id)
    .bind(now_timestamp())
    .bind(record.tenant_id)
    .bind(&columns.query_result)
    .bind(&columns.query_error)
    .bind(&record.request_method)
    .bind(&record.request_url)
    .bind(&columns.request_headers)
    .bind(&columns.request_body)
    .bind(columns.response_status_code)
    .bind(&columns.response_headers)
    .bind(&columns.response_body)
    .bind(&columns.response_error)
    .execute(&mut *tx)
    .await
    .map_err(|e| ForwarderError::persistence(format!("Failed to record audit entry: {e}")))?;

    let id = result.last_insert_rowid();
    Store::commit(tx).await?;

    debug!("Recorded audit entry {} for tenant {}", id, record.tenant_id);
    Ok(id)
}

/// Gets a single audit record by id.
pub async fn get(store: &Store, id: i64) -> Result<Option<AuditRecord>> {
    let mut tx = store.begin().await?;

    let row: Option<AuditRecord> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to get audit entry: {e}")))?;

    Store::commit(tx).await?;
    Ok(row)
}

/// Lists the most recent audit records, newest first.
pub async fn list_recent(store: &Store, limit: i64) -> Result<Vec<AuditRecord>> {
    let mut tx = store.begin().await?;

    let rows: Vec<AuditRecord> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| ForwarderError::persistence(format!("Failed to list audit entries: {e}")))?;

    Store::commit(tx).await?;
    Ok(rows)
}

/// Lists audit records with an id greater than `last_id`, oldest first.
///
/// This is the query a live viewer polls with.
pub async fn list_since(store: &Store, last_id: i64) -> Result<Vec<AuditRecord>> {
    let mut tx = store.begin().await?;

    let rows: Vec<AuditRecord> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id > ? ORDER BY id ASC"))
            .bind(last_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                ForwarderError::persistence(format!("Failed to poll audit entries: {e}"))
            })?;

    Store::commit(tx).await?;
    Ok(rows)
}

/// Returns the number of audit records, optionally for one tenant.
pub async fn count(store: &Store, tenant_id: Option<i64>) -> Result<i64> {
    let mut tx = store.begin().await?;

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE ?1 IS NULL OR tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                ForwarderError::persistence(format!("Failed to count audit entries: {e}"))
            })?;

    Store::commit(tx).await?;
    Ok(count)
}
