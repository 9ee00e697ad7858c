//! Schema versioning for the state database.
//!
//! Migrations are forward-only and listed in `MIGRATIONS` in version order.
//! Each one is applied and recorded in `schema_versions` in its own
//! transaction, so a failed step leaves the previous version intact.

use crate::error::{ForwarderError, Result};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Connection;
use tracing::info;

struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "tenants",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tenant_configs (
                tenant_id INTEGER PRIMARY KEY,
                db_uri TEXT NOT NULL,
                db_query TEXT NOT NULL,
                api_auth_type TEXT NOT NULL DEFAULT 'basic',
                api_username TEXT NOT NULL,
                api_password TEXT NOT NULL,
                api_endpoint TEXT NOT NULL,
                api_request_type TEXT NOT NULL,
                FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        name: "audit_log",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                query_result TEXT,
                query_error TEXT,
                request_method TEXT NOT NULL,
                request_url TEXT NOT NULL,
                request_headers TEXT,
                request_body TEXT,
                response_status_code INTEGER,
                response_headers TEXT,
                response_body TEXT,
                response_error TEXT,
                CHECK (query_result IS NULL OR query_error IS NULL),
                FOREIGN KEY (tenant_id) REFERENCES tenants(id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_log_tenant
            ON audit_log(tenant_id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp
            ON audit_log(timestamp)
            "#,
        ],
    },
];

const SCHEMA_VERSIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_versions (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
"#;

fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Brings the database up to the latest schema version.
///
/// Fails without changes if the database was written by a newer build.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to acquire connection: {e}")))?;

    sqlx::query(SCHEMA_VERSIONS_TABLE)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            ForwarderError::persistence(format!("Failed to create schema_versions table: {e}"))
        })?;

    let applied = applied_version(&mut conn).await?;
    let latest = latest_version();
    if applied > latest {
        return Err(ForwarderError::persistence(format!(
            "State database is at schema version {applied}, newer than supported version \
             {latest}. Please upgrade query-forwarder."
        )));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if !pending.is_empty() {
        info!("Migrating state database from version {applied} to {latest}");
    }
    for migration in pending {
        apply(&mut conn, migration).await?;
    }
    Ok(())
}

async fn applied_version(conn: &mut SqliteConnection) -> Result<i32> {
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to read schema version: {e}")))?;

    Ok(version.unwrap_or(0))
}

async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
    let failed = |e: sqlx::Error| {
        ForwarderError::persistence(format!(
            "Migration v{} ({}) failed: {e}",
            migration.version, migration.name
        ))
    };

    let mut tx = conn.begin().await.map_err(failed)?;
    for statement in migration.statements {
        sqlx::query(*statement).execute(&mut *tx).await.map_err(failed)?;
    }
    sqlx::query("INSERT INTO schema_versions (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;
    tx.commit().await.map_err(failed)?;

    info!("Applied migration v{} ({})", migration.version, migration.name);
    Ok(())
}
