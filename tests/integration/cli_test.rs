//! Runs the compiled binary to check exit codes and what a run leaves behind.

use super::common::{TestEnv, SECRET};
use query_forwarder::crypto::EncryptionService;
use query_forwarder::persistence::{audit, Store};
use std::path::Path;
use std::process::Output;
use tempfile::tempdir;
use tokio::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_query-forwarder");

/// Runs a forward for `tenant` against the store at `dir/state.db`.
async fn forward(dir: &Path, tenant: &str, key: Option<&str>) -> Output {
    let mut command = Command::new(BIN);
    command
        .current_dir(dir)
        .arg(tenant)
        .arg("--config")
        .arg(dir.join("none.toml"))
        .env("QUERY_FORWARDER_DB", dir.join("state.db"))
        .env("RUST_LOG", "off");
    match key {
        Some(key) => command.env("ENCRYPTION_KEY", key),
        None => command.env_remove("ENCRYPTION_KEY"),
    };
    command.output().await.unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[tokio::test]
async fn test_missing_key_exits_before_opening_store() {
    let dir = tempdir().unwrap();

    let output = forward(dir.path(), "acme", None).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output)
        .contains("Error: Configuration error: ENCRYPTION_KEY environment variable is not set"));
    assert!(!dir.path().join("state.db").exists());
}

#[tokio::test]
async fn test_malformed_key_exits_with_failure() {
    let dir = tempdir().unwrap();

    let output = forward(dir.path(), "acme", Some("not-hex")).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Invalid ENCRYPTION_KEY format"));
    assert!(!dir.path().join("state.db").exists());
}

#[tokio::test]
async fn test_unknown_tenant_exits_with_failure_and_logs_nothing() {
    let dir = tempdir().unwrap();
    let key = hex::encode(EncryptionService::generate_key());

    let output = forward(dir.path(), "ghost", Some(&key)).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error: Not found: Tenant 'ghost' not found"));

    let store = Store::open(&dir.path().join("state.db")).await.unwrap();
    assert_eq!(audit::count(&store, None).await.unwrap(), 0);
    store.close().await;
}

#[tokio::test]
async fn test_logged_failure_exits_successfully() {
    let env = TestEnv::new().await;
    env.seed_tenant(
        "acme",
        "sqlite::memory:",
        "SELECT * FROM missing_table",
        "http://127.0.0.1:9/ingest",
        "POST",
    )
    .await;
    env.store.close().await;

    let output = forward(env.dir.path(), "acme", Some(&hex::encode(env.key))).await;

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Query failed"));
    assert!(stdout.contains("Logged to database with ID"));
    assert!(!stdout.contains(SECRET));

    let store = Store::open(&env.dir.path().join("state.db")).await.unwrap();
    assert_eq!(audit::count(&store, None).await.unwrap(), 1);
    store.close().await;
}
