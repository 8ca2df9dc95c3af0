//! Top-level configuration for a ledger node.
//!
//! This module aggregates configuration for:
//!
//! - persistent storage (working directory of the SQLite database),
//! - the chain protocol (request timeout),
//! - the amount scheduler (byte threshold),
//! - the metrics exporter (enable flag + listen address).
//!
//! The goal is to have a single `LedgerConfig` struct that higher-level
//! binaries (e.g. `main.rs`) can construct from defaults, config files,
//! or environment variables as needed.

use std::net::SocketAddr;

use crate::protocol::ProtocolConfig;
use crate::scheduler::SchedulerConfig;
use crate::store::SqliteConfig;

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        // Safe to unwrap: this is a fixed, valid address literal.
        let addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        Self {
            enabled: true,
            listen_addr: addr,
        }
    }
}

/// Top-level configuration for a ledger node.
///
/// This aggregates all the sub-configs needed to wire up a typical
/// node:
///
/// - persistent storage (`storage`),
/// - handshake tuning (`protocol`),
/// - scheduler threshold (`scheduler`),
/// - Prometheus metrics exporter (`metrics`).
#[derive(Clone, Debug, Default)]
pub struct LedgerConfig {
    pub storage: SqliteConfig,
    pub protocol: ProtocolConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
}
