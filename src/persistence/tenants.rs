//! Tenants and their forwarding configuration.
//!
//! The forwarding pipeline only reads these tables. The write helpers here are
//! the admin path used by the CLI and by tests to seed a store; they never see
//! a plaintext secret, only tokens produced by the encryption service.

use super::Store;
use crate::error::{ForwarderError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use tracing::debug;

/// A tenant (customer/organization boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
}

/// A tenant's source query and delivery settings.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct TenantConfig {
    pub tenant_id: i64,
    pub db_uri: String,
    pub db_query: String,
    pub api_auth_type: String,
    pub api_username: String,
    /// Encrypted secret token; never plaintext.
    pub api_password: String,
    pub api_endpoint: String,
    pub api_request_type: String,
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("tenant_id", &self.tenant_id)
            .field("db_uri", &crate::db::display_source(&self.db_uri))
            .field("db_query", &self.db_query)
            .field("api_auth_type", &self.api_auth_type)
            .field("api_username", &self.api_username)
            .field("api_password", &"<encrypted>")
            .field("api_endpoint", &self.api_endpoint)
            .field("api_request_type", &self.api_request_type)
            .finish()
    }
}

/// Fields accepted when writing a tenant's configuration.
#[derive(Debug, Clone)]
pub struct TenantConfigInput<'a> {
    pub db_uri: &'a str,
    pub db_query: &'a str,
    pub api_username: &'a str,
    /// Must be a token from `EncryptionService::encrypt`.
    pub api_password_token: &'a str,
    pub api_endpoint: &'a str,
    pub api_request_type: &'a str,
}

/// Resolves the configuration for the named tenant.
///
/// Both lookups run in one transaction. A missing tenant and a tenant without
/// configuration are reported as distinct `NotFound` errors.
pub async fn resolve(store: &Store, tenant_name: &str) -> Result<(Tenant, TenantConfig)> {
    let mut tx = store.begin().await?;

    let tenant: Option<Tenant> = sqlx::query_as("SELECT id, name FROM tenants WHERE name = ?")
        .bind(tenant_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to look up tenant: {e}")))?;

    let tenant = tenant
        .ok_or_else(|| ForwarderError::not_found(format!("Tenant '{tenant_name}' not found")))?;

    let config: Option<TenantConfig> = sqlx::query_as(
        r#"
        SELECT tenant_id, db_uri, db_query, api_auth_type, api_username,
               api_password, api_endpoint, api_request_type
        FROM tenant_configs
        WHERE tenant_id = ?
        "#,
    )
    .bind(tenant.id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ForwarderError::persistence(format!("Failed to load tenant config: {e}")))?;

    let config = config.ok_or_else(|| {
        ForwarderError::not_found(format!(
            "No configuration found for tenant '{tenant_name}'"
        ))
    })?;

    Store::commit(tx).await?;

    debug!("Resolved config for tenant {} (id {})", tenant.name, tenant.id);
    Ok((tenant, config))
}

/// Looks up a tenant by name.
pub async fn find_tenant(store: &Store, name: &str) -> Result<Option<Tenant>> {
    let mut tx = store.begin().await?;

    let tenant: Option<Tenant> = sqlx::query_as("SELECT id, name FROM tenants WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to look up tenant: {e}")))?;

    Store::commit(tx).await?;
    Ok(tenant)
}

/// Creates a tenant and returns it.
pub async fn create_tenant(store: &Store, name: &str) -> Result<Tenant> {
    let mut tx = store.begin().await?;

    let result = sqlx::query("INSERT INTO tenants (name) VALUES (?)")
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| ForwarderError::persistence(format!("Failed to create tenant: {e}")))?;

    Store::commit(tx).await?;

    Ok(Tenant {
        id: result.last_insert_rowid(),
        name: name.to_string(),
    })
}

/// Inserts or replaces a tenant's configuration.
pub async fn save_tenant_config(
    store: &Store,
    tenant_id: i64,
    input: &TenantConfigInput<'_>,
) -> Result<()> {
    let mut tx = store.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO tenant_configs
        (tenant_id, db_uri, db_query, api_auth_type, api_username, api_password,
         api_endpoint, api_request_type)
        VALUES (?, ?, ?, 'basic', ?, ?, ?, ?)
        ON CONFLICT(tenant_id) DO UPDATE SET
            db_uri = excluded.db_uri,
            db_query = excluded.db_query,
            api_username = excluded.api_username,
            api_password = excluded.api_password,
            api_endpoint = excluded.api_endpoint,
            api_request_type = excluded.api_request_type
        "#,
    )
    .bind(tenant_id)
    .bind(input.db_uri)
    .bind(input.db_query)
    .bind(input.api_username)
    .bind(input.api_password_token)
    .bind(input.api_endpoint)
    .bind(input.api_request_type)
    .execute(&mut *tx)
    .await
    .map_err(|e| ForwarderError::persistence(format!("Failed to save tenant config: {e}")))?;

    Store::commit(tx).await
}
