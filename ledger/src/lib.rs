//! Ledger library crate.
//!
//! This crate provides the core building blocks of a tamper-evident,
//! append-only interaction ledger for a peer-to-peer overlay:
//!
//! - strongly-typed domain types (`types`),
//! - the canonical payload codec (`codec`),
//! - persistent and in-memory block stores (`store`),
//! - the signing seam and its Ed25519 implementation (`crypto`),
//! - transport and discovery seams plus wire messages (`network`),
//! - the two-party signature handshake (`protocol`),
//! - byte accumulators that trigger handshakes (`scheduler`),
//! - backward ancestor discovery (`crawler`),
//! - Prometheus-based metrics (`metrics`),
//! - and a top-level node configuration (`config`).
//!
//! Whenever two peers exchange data volume they jointly produce a
//! doubly-signed block that becomes the next link in each participant's
//! personal chain; the persisted set of blocks feeds downstream
//! reputation scoring. Higher-level binaries compose these pieces into
//! overlay nodes.

pub mod codec;
pub mod config;
pub mod crawler;
pub mod crypto;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-export top-level configuration types.
pub use config::{LedgerConfig, MetricsConfig};

// Re-export "core" protocol types and traits.
pub use protocol::{
    AcceptAll, ChainEngine, ChainEvent, ChainHandle, ProtocolConfig, ProtocolError,
    RequestOutcome, SignaturePolicy, spawn_chain_actor,
};

// Re-export storage backends.
pub use store::{LedgerStore, MemoryStore, SqliteConfig, SqliteStore, StoreError};

// Re-export the network seams.
pub use network::{Candidate, CandidateDirectory, Transport, TransportError};

// Re-export scheduler and crawler entry points.
pub use crawler::{AbsorbOutcome, Crawler};
pub use scheduler::{AmountScheduler, HandshakeInitiator, SchedulerConfig};

// Re-export the signing seam.
pub use crypto::{Ed25519Signer, Signer, verify_signature};

// Re-export metrics registry and exporter.
pub use metrics::{LedgerMetrics, MetricsRegistry, run_metrics_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;
