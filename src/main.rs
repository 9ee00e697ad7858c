//! query-forwarder: runs a tenant's query and forwards the result to its API.

use query_forwarder::cli::{Cli, Command};
use query_forwarder::config::{AppConfig, TenantSettings};
use query_forwarder::crypto::EncryptionService;
use query_forwarder::error::{ForwarderError, Result};
use query_forwarder::forwarder::{Forwarder, RunReport};
use query_forwarder::logging;
use query_forwarder::persistence::{audit, tenants, Store};
use std::io::Read;
use tracing::{debug, info};
use zeroize::Zeroizing;

#[tokio::main]
async fn main() {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    logging::init_stderr_logging();

    if let Err(e) = run().await {
        debug!("Aborting with {}", e.category());
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command() {
        Command::GenerateKey => {
            println!("{}", hex::encode(EncryptionService::generate_key()));
            Ok(())
        }
        Command::EncryptSecret => encrypt_secret(),
        command => {
            let config_path = cli.config_path();
            info!("Loading config from: {}", config_path.display());
            let config = AppConfig::load(&config_path)?;
            run_with_store(command, &config).await
        }
    }
}

async fn run_with_store(command: Command, config: &AppConfig) -> Result<()> {
    // Validate the key before touching the store, so a bad key never
    // leaves a trace.
    let encryption = match &command {
        Command::Forward(_) => Some(EncryptionService::from_env()?),
        _ => None,
    };

    let store = Store::open(&config.store_path()?).await?;
    let result = match (command, encryption) {
        (Command::Forward(tenant), Some(encryption)) => {
            let forwarder = Forwarder::new(store.clone(), encryption, config)?;
            let report = forwarder.run(&tenant).await?;
            print_report(&report);
            Ok(())
        }
        (Command::Recent(limit), _) => print_recent(&store, limit).await,
        (Command::CreateTenant(name), _) => {
            let tenant = tenants::create_tenant(&store, &name).await?;
            println!("Created tenant '{}' with ID {}", tenant.name, tenant.id);
            Ok(())
        }
        (Command::SetConfig(path), _) => set_config(&store, &path).await,
        (command, _) => Err(ForwarderError::internal(format!(
            "Unexpected command {command:?}"
        ))),
    };

    store.close().await;
    result
}

fn encrypt_secret() -> Result<()> {
    let encryption = EncryptionService::from_env()?;

    let mut secret = Zeroizing::new(String::new());
    std::io::stdin()
        .read_to_string(&mut secret)
        .map_err(|e| ForwarderError::configuration(format!("Failed to read secret from stdin: {e}")))?;

    let trimmed = secret.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(ForwarderError::configuration("No secret provided on stdin"));
    }

    println!("{}", encryption.encrypt(trimmed)?);
    Ok(())
}

async fn print_recent(store: &Store, limit: i64) -> Result<()> {
    for record in audit::list_recent(store, limit).await? {
        let line = serde_json::to_string(&record)
            .map_err(|e| ForwarderError::internal(format!("Failed to serialize record: {e}")))?;
        println!("{line}");
    }
    Ok(())
}

async fn set_config(store: &Store, path: &std::path::Path) -> Result<()> {
    let settings = TenantSettings::load(path)?;

    let tenant = match tenants::find_tenant(store, &settings.tenant).await? {
        Some(tenant) => tenant,
        None => tenants::create_tenant(store, &settings.tenant).await?,
    };
    tenants::save_tenant_config(store, tenant.id, &settings.as_input()).await?;

    println!("Saved configuration for tenant '{}'", tenant.name);
    Ok(())
}

fn print_report(report: &RunReport) {
    match report.query.error() {
        Some(error) => println!("Query failed: {error}"),
        None => println!(
            "Query executed successfully, got {} bytes of data",
            report.query.result().map(str::len).unwrap_or(0)
        ),
    }

    if let Some(delivery) = &report.delivery {
        match delivery.response() {
            Some(response) => println!("API response: HTTP {}", response.status),
            None => println!(
                "API request error: {}",
                delivery.error().unwrap_or_default()
            ),
        }
    }

    println!("Logged to database with ID {}", report.audit_id);
}
