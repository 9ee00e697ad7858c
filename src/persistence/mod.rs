//! Persistence layer for the query forwarder.
//!
//! Manages the SQLite state database holding tenants, their forwarding
//! configuration, and the append-only audit log.

pub mod audit;
mod migrations;
pub mod tenants;

pub use audit::{AuditRecord, NewAuditRecord};
pub use tenants::{Tenant, TenantConfig, TenantConfigInput};

use crate::error::{ForwarderError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

/// Handle to the state database.
///
/// Every read or write goes through a transaction from [`Store::begin`]. The
/// transaction is committed explicitly; dropping it on an error path rolls it
/// back.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl Store {
    /// Opens or creates the state database at the specified path.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::ensure_parent_dirs(path)?;

        let mut last_error = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt)))
                    .await;
            }

            match Self::connect(path).await {
                Ok(pool) => {
                    migrations::run_migrations(&pool).await?;
                    info!("State database opened at {}", path.display());
                    return Ok(Self {
                        pool,
                        db_path: Some(path.to_path_buf()),
                    });
                }
                Err(e) => {
                    debug!("State database open attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ForwarderError::persistence("Failed to open state database after retries")
        }))
    }

    /// Wraps an existing pool, running migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrations::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            db_path: None,
        })
    }

    /// Creates a connection pool to the SQLite database.
    async fn connect(path: &Path) -> Result<SqlitePool> {
        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| ForwarderError::persistence(format!("Invalid database path: {e}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                ForwarderError::persistence(format!("Failed to connect to state database: {e}"))
            })
    }

    /// Ensures parent directories exist for the database path.
    fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ForwarderError::persistence(format!(
                    "Failed to create data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Starts a transaction on the state database.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| ForwarderError::persistence(format!("Failed to begin transaction: {e}")))
    }

    /// Commits a transaction started with [`Store::begin`].
    pub async fn commit(tx: Transaction<'static, Sqlite>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| ForwarderError::persistence(format!("Failed to commit transaction: {e}")))
    }

    /// Returns the path to the state database, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
