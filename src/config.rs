//! Configuration management for the query forwarder.
//!
//! Settings come from an optional TOML file, with environment variables applied
//! on top. The encryption key is deliberately not part of this file; it is read
//! from `ENCRYPTION_KEY` by [`crate::crypto::EncryptionService::from_env`].

use crate::error::{ForwarderError, Result};
use crate::persistence::TenantConfigInput;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the state database path.
pub const STORE_PATH_ENV: &str = "QUERY_FORWARDER_DB";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// State database settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Source query settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Outbound delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Where tenants, configs and the audit log live.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Path to the SQLite state database. Defaults to the platform data dir.
    pub path: Option<PathBuf>,
}

/// Limits applied to the tenant's source query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,
}

/// Limits applied to the outbound HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

fn default_query_timeout() -> u64 {
    30
}

fn default_delivery_timeout() -> u64 {
    30
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_query_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("query-forwarder")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file, then applies environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ForwarderError::configuration(format!("Failed to read config file: {e}"))
        })?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ForwarderError::configuration(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Applies environment overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(STORE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
    }

    /// Rejects settings that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.query.timeout_secs == 0 {
            return Err(ForwarderError::configuration(
                "query.timeout_secs must be greater than zero",
            ));
        }
        if self.delivery.timeout_secs == 0 {
            return Err(ForwarderError::configuration(
                "delivery.timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Returns the state database path, falling back to the platform data dir.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir().ok_or_else(|| {
            ForwarderError::configuration("Could not determine data directory")
        })?;
        Ok(data_dir.join("query-forwarder").join("state.db"))
    }
}

/// A tenant's forwarding settings as written by an operator.
///
/// Read by `--set-config`. The secret must already be encrypted with
/// `--encrypt-secret`; plaintext never appears in this file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TenantSettings {
    pub tenant: String,
    pub db_uri: String,
    pub db_query: String,
    pub api_username: String,
    pub api_password_token: String,
    pub api_endpoint: String,
    #[serde(default = "default_request_type")]
    pub api_request_type: String,
}

fn default_request_type() -> String {
    "POST".to_string()
}

impl TenantSettings {
    /// Loads tenant settings from a TOML file. Unlike [`AppConfig::load`], the
    /// file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForwarderError::configuration(format!(
                "Failed to read tenant settings {}: {e}",
                path.display()
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            ForwarderError::configuration(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    pub fn as_input(&self) -> TenantConfigInput<'_> {
        TenantConfigInput {
            db_uri: &self.db_uri,
            db_query: &self.db_query,
            api_username: &self.api_username,
            api_password_token: &self.api_password_token,
            api_endpoint: &self.api_endpoint,
            api_request_type: &self.api_request_type,
        }
    }
}
