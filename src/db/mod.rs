//! Source database access for the forwarder.
//!
//! Each run opens one transient connection to the tenant's database, runs the
//! configured query, serializes every row to JSON and closes the connection
//! again, on the failure path as well as the success path.

mod postgres;
mod sqlite;
mod types;

pub use postgres::PostgresSource;
pub use sqlite::SqliteSource;
pub use types::{JsonRow, QueryOutcome};

use crate::error::{ForwarderError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Supported source database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    Postgres,
    Sqlite,
}

impl SourceBackend {
    /// Parses a backend from a URL scheme.
    ///
    /// SQLAlchemy-style driver suffixes (`postgresql+asyncpg`) are ignored.
    pub fn parse(scheme: &str) -> Option<Self> {
        let base = scheme.split('+').next().unwrap_or(scheme);
        match base.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the URL scheme sqlx expects for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Detects the backend and returns the connection string sqlx can open.
    pub fn detect(connection_string: &str) -> Result<(Self, String)> {
        let (scheme, rest) = connection_string
            .split_once(':')
            .ok_or_else(|| ForwarderError::query("Connection string has no URL scheme"))?;

        let backend = Self::parse(scheme).ok_or_else(|| {
            ForwarderError::query(format!("Unsupported database URL scheme '{scheme}'"))
        })?;

        Ok((backend, format!("{}:{}", backend.url_scheme(), rest)))
    }
}

impl fmt::Display for SourceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url_scheme())
    }
}

/// A single open connection to a tenant's source database.
#[async_trait]
pub trait SourceClient: Send {
    /// Executes a query and returns every row as a JSON object.
    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens a source connection for the given backend.
pub async fn connect(backend: SourceBackend, url: &str) -> Result<Box<dyn SourceClient>> {
    match backend {
        SourceBackend::Postgres => Ok(Box::new(PostgresSource::connect(url).await?)),
        SourceBackend::Sqlite => Ok(Box::new(SqliteSource::connect(url).await?)),
    }
}

/// Returns a log-safe form of a connection string with any password masked.
pub fn display_source(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}

/// Runs `query` against the database at `connection_string`.
///
/// Never returns both a result and an error: failures of any kind (bad URL,
/// unreachable host, bad SQL, timeout) come back as [`QueryOutcome::Failed`].
pub async fn execute(connection_string: &str, query: &str, timeout: Duration) -> QueryOutcome {
    match fetch_all(connection_string, query, timeout).await {
        Ok(rows) => match serde_json::to_string(&rows) {
            Ok(json) => {
                info!("Query returned {} rows ({} bytes)", rows.len(), json.len());
                QueryOutcome::Success(json)
            }
            Err(e) => QueryOutcome::Failed(format!("Failed to serialize query result: {e}")),
        },
        Err(e) => {
            warn!("{}", e);
            QueryOutcome::Failed(e.to_string())
        }
    }
}

async fn fetch_all(connection_string: &str, query: &str, timeout: Duration) -> Result<Vec<JsonRow>> {
    let (backend, url) = SourceBackend::detect(connection_string)?;
    debug!(
        "Connecting to {} source at {}",
        backend,
        display_source(connection_string)
    );

    let mut client = tokio::time::timeout(timeout, connect(backend, &url))
        .await
        .map_err(|_| timed_out("Connecting", timeout))??;

    let rows = tokio::time::timeout(timeout, client.fetch_rows(query))
        .await
        .map_err(|_| timed_out("Query", timeout))
        .and_then(|r| r);

    if let Err(e) = client.close().await {
        warn!("Failed to close source connection: {e}");
    }

    rows
}

fn timed_out(what: &str, timeout: Duration) -> ForwarderError {
    ForwarderError::query(format!(
        "{what} timed out after {} seconds",
        timeout.as_secs()
    ))
}
