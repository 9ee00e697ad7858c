//! Command-line argument parsing for the query forwarder.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Forwards a tenant's query results to its API endpoint.
#[derive(Parser, Debug)]
#[command(name = "query-forwarder")]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["tenant", "generate_key", "encrypt_secret", "recent", "create_tenant", "set_config"])
))]
pub struct Cli {
    /// Name of the tenant to run a forward for
    #[arg(value_name = "TENANT")]
    pub tenant: Option<String>,

    /// Print a new random encryption key (hex) and exit
    #[arg(long)]
    pub generate_key: bool,

    /// Read a secret from stdin and print its encrypted token
    #[arg(long)]
    pub encrypt_secret: bool,

    /// Print the N most recent audit records as JSON lines
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(i64).range(1..))]
    pub recent: Option<i64>,

    /// Create a tenant with the given name
    #[arg(long, value_name = "NAME")]
    pub create_tenant: Option<String>,

    /// Write a tenant's configuration from a TOML file
    #[arg(long, value_name = "PATH")]
    pub set_config: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Forward(String),
    GenerateKey,
    EncryptSecret,
    Recent(i64),
    CreateTenant(String),
    SetConfig(PathBuf),
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the selected command. The argument group guarantees exactly one.
    pub fn command(&self) -> Command {
        if self.generate_key {
            Command::GenerateKey
        } else if self.encrypt_secret {
            Command::EncryptSecret
        } else if let Some(n) = self.recent {
            Command::Recent(n)
        } else if let Some(name) = &self.create_tenant {
            Command::CreateTenant(name.clone())
        } else if let Some(path) = &self.set_config {
            Command::SetConfig(path.clone())
        } else {
            Command::Forward(self.tenant.clone().unwrap_or_default())
        }
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::AppConfig::default_path)
    }
}
