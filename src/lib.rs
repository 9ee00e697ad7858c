//! query-forwarder - runs per-tenant database queries and forwards the
//! results to each tenant's HTTP endpoint, auditing every run.
//!
//! This library exposes the core modules for use by the binary and in
//! integration tests.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod delivery;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod persistence;
