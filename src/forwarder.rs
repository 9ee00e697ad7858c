//! Orchestration of a single forwarding run.
//!
//! A run resolves the tenant's configuration, executes the source query,
//! delivers the result and writes exactly one audit record. Failures of the
//! query or the delivery are recorded and the run still succeeds; only errors
//! that happen before there is anything to record (or while recording) are
//! returned to the caller.

use crate::config::AppConfig;
use crate::crypto::EncryptionService;
use crate::db::{self, QueryOutcome};
use crate::delivery::{Delivery, DeliveryClient};
use crate::error::Result;
use crate::persistence::{audit, tenants, NewAuditRecord, Store};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The stages a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    ResolvingConfig,
    RunningQuery,
    QueryFailed,
    Delivering,
    Delivered,
    DeliveryFailed,
    Logged,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolvingConfig => "resolving config",
            Self::RunningQuery => "running query",
            Self::QueryFailed => "query failed",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::DeliveryFailed => "delivery failed",
            Self::Logged => "logged",
        };
        f.write_str(name)
    }
}

/// What happened during a logged run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub audit_id: i64,
    pub tenant_id: i64,
    pub tenant: String,
    pub stages: Vec<RunStage>,
    pub query: QueryOutcome,
    /// Absent when the query failed.
    pub delivery: Option<Delivery>,
}

impl RunReport {
    /// True when the query succeeded and the endpoint answered with a 2xx.
    pub fn is_success(&self) -> bool {
        self.delivery
            .as_ref()
            .and_then(Delivery::response)
            .map(|r| r.is_success())
            .unwrap_or(false)
    }
}

/// Runs forwards for tenants in one state store.
#[derive(Debug)]
pub struct Forwarder {
    store: Store,
    encryption: EncryptionService,
    delivery: DeliveryClient,
    query_timeout: Duration,
}

impl Forwarder {
    /// Creates a forwarder. Taking an `EncryptionService` means the key has
    /// already been validated before any run starts.
    pub fn new(store: Store, encryption: EncryptionService, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            store,
            encryption,
            delivery: DeliveryClient::new(config.delivery.timeout())?,
            query_timeout: config.query.timeout(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs one forward for the named tenant.
    ///
    /// Returns `NotFound` without writing anything when the tenant or its
    /// configuration is missing. Otherwise exactly one audit record is written
    /// and its id is in the report.
    pub async fn run(&self, tenant_name: &str) -> Result<RunReport> {
        let mut stages = vec![RunStage::ResolvingConfig];
        let (tenant, config) = tenants::resolve(&self.store, tenant_name).await?;
        debug!("Resolved {:?}", config);

        stages.push(RunStage::RunningQuery);
        info!("Executing query for tenant '{}'", tenant.name);
        let query = db::execute(&config.db_uri, &config.db_query, self.query_timeout).await;

        let delivery = match query.result() {
            Some(body) => {
                stages.push(RunStage::Delivering);
                let delivery = self.delivery.deliver(&config, body, &self.encryption).await;
                stages.push(match delivery.response() {
                    Some(_) => RunStage::Delivered,
                    None => RunStage::DeliveryFailed,
                });
                Some(delivery)
            }
            None => {
                stages.push(RunStage::QueryFailed);
                warn!("Skipping delivery for tenant '{}'", tenant.name);
                None
            }
        };

        let audit_id = audit::record(
            &self.store,
            &NewAuditRecord {
                tenant_id: tenant.id,
                query: query.clone(),
                request_method: config.api_request_type.clone(),
                request_url: config.api_endpoint.clone(),
                delivery: delivery.clone(),
            },
        )
        .await?;
        stages.push(RunStage::Logged);

        info!("Logged run for tenant '{}' with id {}", tenant.name, audit_id);

        Ok(RunReport {
            audit_id,
            tenant_id: tenant.id,
            tenant: tenant.name,
            stages,
            query,
            delivery,
        })
    }
}
