//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed ledger metrics, and an async
//! HTTP exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::error;

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

/// Ledger-related Prometheus metrics.
///
/// These are registered into a [`Registry`] and updated from the chain
/// actor as handshakes and crawls progress.
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Handshakes completed on either role, i.e. blocks this peer
    /// co-signed.
    pub handshakes_completed: IntCounter,
    /// Initiations abandoned because the response never arrived.
    pub handshakes_timed_out: IntCounter,
    /// Inbound signature requests dropped while a local chain operation
    /// was in flight.
    pub requests_dropped_busy: IntCounter,
    /// Blocks written to the store, including crawled ones.
    pub blocks_persisted: IntCounter,
    /// Predecessor requests emitted by the crawler.
    pub crawl_requests_sent: IntCounter,
    /// Wall-clock duration of successful requester-side handshakes, in
    /// seconds.
    pub handshake_duration_seconds: Histogram,
}

impl LedgerMetrics {
    /// Registers ledger metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let handshakes_completed = IntCounter::with_opts(Opts::new(
            "ledger_handshakes_completed",
            "Total number of completed signature handshakes",
        ))?;
        registry.register(Box::new(handshakes_completed.clone()))?;

        let handshakes_timed_out = IntCounter::with_opts(Opts::new(
            "ledger_handshakes_timed_out",
            "Total number of signature requests abandoned on timeout",
        ))?;
        registry.register(Box::new(handshakes_timed_out.clone()))?;

        let requests_dropped_busy = IntCounter::with_opts(Opts::new(
            "ledger_requests_dropped_busy",
            "Total number of inbound signature requests dropped while busy",
        ))?;
        registry.register(Box::new(requests_dropped_busy.clone()))?;

        let blocks_persisted = IntCounter::with_opts(Opts::new(
            "ledger_blocks_persisted",
            "Total number of blocks written to the store",
        ))?;
        registry.register(Box::new(blocks_persisted.clone()))?;

        let crawl_requests_sent = IntCounter::with_opts(Opts::new(
            "ledger_crawl_requests_sent",
            "Total number of predecessor requests emitted by the crawler",
        ))?;
        registry.register(Box::new(crawl_requests_sent.clone()))?;

        let handshake_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_handshake_duration_seconds",
                "Duration of successful requester-side handshakes in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(handshake_duration_seconds.clone()))?;

        Ok(Self {
            handshakes_completed,
            handshakes_timed_out,
            requests_dropped_busy,
            blocks_persisted,
            crawl_requests_sent,
            handshake_duration_seconds,
        })
    }
}

/// Wrapper around a Prometheus registry and the ledger metrics.
///
/// This is the main handle you pass around in the node. It can be
/// wrapped in an [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub ledger: LedgerMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying
    /// `Registry` and registers the ledger metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ledger".to_string()), None)?;
        let ledger = LedgerMetrics::register(&registry)?;
        Ok(Self { registry, ledger })
    }

    /// Encodes all metrics in this registry into the Prometheus text
    /// format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
///
/// This function is `async` and is intended to be spawned onto a Tokio
/// runtime, e.g.:
///
/// ```ignore
/// let registry = Arc::new(MetricsRegistry::new()?);
/// let addr: SocketAddr = "127.0.0.1:9898".parse()?;
/// tokio::spawn(run_metrics_http_server(registry.clone(), addr));
/// ```
pub async fn run_metrics_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                error!("metrics HTTP server error: {err}");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}
