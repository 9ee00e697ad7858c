//! Integration tests for the state store.

use pretty_assertions::assert_eq;
use query_forwarder::config::TenantSettings;
use query_forwarder::db::QueryOutcome;
use query_forwarder::persistence::{audit, tenants, NewAuditRecord, Store};
use tempfile::tempdir;

async fn create_test_store() -> (Store, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test_state.db");
    let store = Store::open(&path).await.unwrap();
    (store, dir)
}

fn failed_run(tenant_id: i64, error: &str) -> NewAuditRecord {
    NewAuditRecord {
        tenant_id,
        query: QueryOutcome::Failed(error.to_string()),
        request_method: "POST".to_string(),
        request_url: "http://example.test/ingest".to_string(),
        delivery: None,
    }
}

#[tokio::test]
async fn test_store_creation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("state.db");

    let store = Store::open(&path).await.unwrap();
    assert!(path.exists());
    assert_eq!(store.path(), Some(path.as_path()));
    store.close().await;
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let (store, dir) = create_test_store().await;
    let tenant = tenants::create_tenant(&store, "acme").await.unwrap();
    let id = audit::record(&store, &failed_run(tenant.id, "boom"))
        .await
        .unwrap();
    store.close().await;

    let store = Store::open(&dir.path().join("test_state.db")).await.unwrap();
    let record = audit::get(&store, id).await.unwrap().unwrap();
    assert_eq!(record.query_error.as_deref(), Some("boom"));
    assert_eq!(record.tenant_id, tenant.id);
}

#[tokio::test]
async fn test_audit_requires_existing_tenant() {
    let (store, _dir) = create_test_store().await;
    assert!(audit::record(&store, &failed_run(999, "orphan")).await.is_err());
    assert_eq!(audit::count(&store, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_polling_sees_only_new_rows() {
    let (store, _dir) = create_test_store().await;
    let acme = tenants::create_tenant(&store, "acme").await.unwrap();
    let globex = tenants::create_tenant(&store, "globex").await.unwrap();

    let first = audit::record(&store, &failed_run(acme.id, "a")).await.unwrap();
    let seen = audit::list_since(&store, 0).await.unwrap();
    assert_eq!(seen.len(), 1);

    audit::record(&store, &failed_run(globex.id, "b")).await.unwrap();
    audit::record(&store, &failed_run(acme.id, "c")).await.unwrap();

    let new_rows = audit::list_since(&store, first).await.unwrap();
    let errors: Vec<_> = new_rows
        .iter()
        .map(|r| r.query_error.clone().unwrap())
        .collect();
    assert_eq!(errors, vec!["b", "c"]);

    assert_eq!(audit::count(&store, Some(acme.id)).await.unwrap(), 2);
    assert_eq!(audit::count(&store, Some(globex.id)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_tenant_settings_round_trip_through_store() {
    let (store, dir) = create_test_store().await;
    let path = dir.path().join("acme.toml");
    std::fs::write(
        &path,
        r#"
tenant = "acme"
db_uri = "sqlite::memory:"
db_query = "SELECT 1"
api_username = "svc"
api_password_token = "dG9rZW4="
api_endpoint = "http://example.test/ingest"
api_request_type = "PUT"
"#,
    )
    .unwrap();

    let settings = TenantSettings::load(&path).unwrap();
    let tenant = tenants::create_tenant(&store, &settings.tenant).await.unwrap();
    tenants::save_tenant_config(&store, tenant.id, &settings.as_input())
        .await
        .unwrap();

    let (resolved, config) = tenants::resolve(&store, "acme").await.unwrap();
    assert_eq!(resolved, tenant);
    assert_eq!(config.api_password, "dG9rZW4=");
    assert_eq!(config.api_request_type, "PUT");
    assert_eq!(config.api_auth_type, "basic");
}
