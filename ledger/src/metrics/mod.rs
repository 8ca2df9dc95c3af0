//! Prometheus metrics for the ledger.
//!
//! [`MetricsRegistry`] owns a Prometheus registry plus the
//! strongly-typed ledger metrics, and [`prometheus::run_metrics_http_server`]
//! serves them over HTTP.

pub mod prometheus;

pub use self::prometheus::{LedgerMetrics, MetricsRegistry, run_metrics_http_server};
