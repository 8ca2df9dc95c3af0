// src/main.rs
//
// Minimal demo node that wires up the ledger library:
//
// - SQLite-backed stores, one per in-process peer
// - Ed25519 identities
// - An in-process transport switch routing messages between chain actors
// - The amount scheduler driving a handshake once enough bytes accrue
// - A third peer crawling the resulting chain back to genesis
// - Prometheus metrics exporter on /metrics

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger::{
    AcceptAll, AmountScheduler, Candidate, CandidateDirectory, ChainEvent, ChainHandle,
    Ed25519Signer, LedgerConfig, MetricsRegistry, PeerAddr, PublicKey, Signer,
    SqliteConfig, SqliteStore, Transport, TransportError,
    network::{
        BlockRequest, BlockResponse, LATEST_SEQUENCE_NUMBER, SignatureRequest, SignatureResponse,
    },
    run_metrics_http_server, spawn_chain_actor,
};

/// Routing table shared by every in-process peer. Doubles as the
/// candidate directory for schedulers and crawlers.
#[derive(Default)]
struct InProcessSwitch {
    routes: Mutex<HashMap<PeerAddr, (Candidate, ChainHandle)>>,
}

impl InProcessSwitch {
    fn register(&self, candidate: Candidate, handle: ChainHandle) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(candidate.addr, (candidate, handle));
    }

    fn handle_for(&self, addr: &PeerAddr) -> Option<ChainHandle> {
        self.routes
            .lock()
            .expect("routes lock")
            .get(addr)
            .map(|(_, handle)| handle.clone())
    }
}

impl CandidateDirectory for InProcessSwitch {
    fn candidate_for_peer(&self, peer: &PeerAddr) -> Option<Candidate> {
        self.routes
            .lock()
            .expect("routes lock")
            .get(peer)
            .map(|(candidate, _)| candidate.clone())
    }

    fn candidate_for_key(&self, public_key: &PublicKey) -> Option<Candidate> {
        self.routes
            .lock()
            .expect("routes lock")
            .values()
            .map(|(candidate, _)| candidate.clone())
            .find(|candidate| candidate.public_key == *public_key)
    }
}

/// One peer's view of the switch: outbound messages carry this peer as
/// the authenticated source.
struct PeerTransport {
    local: Candidate,
    switch: Arc<InProcessSwitch>,
}

impl PeerTransport {
    fn deliver(&self, to: &Candidate, delivered: bool) -> Result<(), TransportError> {
        if delivered {
            Ok(())
        } else {
            Err(TransportError::SendFailed(format!(
                "mailbox of {} unavailable",
                to.addr
            )))
        }
    }

    fn destination(&self, to: &Candidate) -> Result<ChainHandle, TransportError> {
        self.switch
            .handle_for(&to.addr)
            .ok_or_else(|| TransportError::SendFailed(format!("no route to {}", to.addr)))
    }
}

impl Transport for PeerTransport {
    fn send_signature_request(
        &self,
        to: &Candidate,
        request: &SignatureRequest,
    ) -> Result<(), TransportError> {
        let handle = self.destination(to)?;
        let delivered = handle.deliver_signature_request(self.local.clone(), request.clone());
        self.deliver(to, delivered)
    }

    fn send_signature_response(
        &self,
        to: &Candidate,
        response: &SignatureResponse,
    ) -> Result<(), TransportError> {
        let handle = self.destination(to)?;
        let delivered = handle.deliver_signature_response(response.clone());
        self.deliver(to, delivered)
    }

    fn send_block_request(
        &self,
        to: &Candidate,
        request: &BlockRequest,
    ) -> Result<(), TransportError> {
        let handle = self.destination(to)?;
        let delivered = handle.deliver_block_request(self.local.clone(), *request);
        self.deliver(to, delivered)
    }

    fn send_block_response(
        &self,
        to: &Candidate,
        response: &BlockResponse,
    ) -> Result<(), TransportError> {
        let handle = self.destination(to)?;
        let delivered = handle.deliver_block_response(response.clone());
        self.deliver(to, delivered)
    }
}

struct Peer {
    candidate: Candidate,
    handle: ChainHandle,
    events: UnboundedReceiver<ChainEvent>,
}

fn spawn_peer(
    name: &str,
    seed: u8,
    port: u16,
    cfg: &LedgerConfig,
    switch: &Arc<InProcessSwitch>,
    metrics: &Arc<MetricsRegistry>,
) -> Result<Peer, String> {
    let signer = Arc::new(Ed25519Signer::from_seed([seed; 32]));
    let candidate = Candidate {
        addr: PeerAddr(
            format!("127.0.0.1:{port}")
                .parse()
                .expect("hard-coded peer address should parse"),
        ),
        public_key: signer.public_key(),
    };

    let storage = SqliteConfig {
        working_dir: cfg.storage.working_dir.join(name),
    };
    let store = SqliteStore::open(&storage)
        .map_err(|e| format!("failed to open store for {name}: {e}"))?;

    let transport = Arc::new(PeerTransport {
        local: candidate.clone(),
        switch: switch.clone(),
    });

    let (handle, events, _join) = spawn_chain_actor(
        store,
        signer,
        transport,
        switch.clone(),
        AcceptAll,
        cfg.protocol.clone(),
        metrics.clone(),
    );
    switch.register(candidate.clone(), handle.clone());
    info!(peer = name, addr = %candidate.addr, "peer ready");

    Ok(Peer {
        candidate,
        handle,
        events,
    })
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_demo().await {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run_demo() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // For now, just use defaults. Later this can load from a file/CLI/env.
    let cfg = LedgerConfig::default();

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_metrics_http_server(metrics_clone, addr).await {
                eprintln!("metrics HTTP server error: {e}");
            }
        });
        info!("metrics exporter listening on http://{addr}/metrics");
    }

    // ---------------------------
    // Three in-process peers
    // ---------------------------

    let switch = Arc::new(InProcessSwitch::default());
    let mut alice = spawn_peer("alice", 1, 6001, &cfg, &switch, &metrics)?;
    let mut bob = spawn_peer("bob", 2, 6002, &cfg, &switch, &metrics)?;
    let mut carol = spawn_peer("carol", 3, 6003, &cfg, &switch, &metrics)?;

    // ---------------------------
    // Scheduler-driven handshake
    // ---------------------------

    let mut scheduler = AmountScheduler::new(&cfg.scheduler, switch.clone(), alice.handle.clone());

    // Simulated transfers from Alice to Bob: the second report pushes
    // the accumulator over the threshold and triggers the handshake.
    scheduler.record_received(bob.candidate.addr, 25_000);
    scheduler.record_sent(bob.candidate.addr, 600_000).await;
    scheduler.record_sent(bob.candidate.addr, 600_000).await;

    let alice_event = timeout(Duration::from_secs(10), alice.events.recv())
        .await
        .map_err(|_| "timed out waiting for Alice's handshake".to_string())?
        .ok_or_else(|| "Alice's event channel closed".to_string())?;
    let bob_event = timeout(Duration::from_secs(10), bob.events.recv())
        .await
        .map_err(|_| "timed out waiting for Bob's handshake".to_string())?
        .ok_or_else(|| "Bob's event channel closed".to_string())?;
    info!(?alice_event, ?bob_event, "handshake finished on both sides");

    // Nothing else is over the threshold, so the post-handshake scan
    // stays quiet.
    let relaunched = scheduler.notify_done().await;
    info!(relaunched, "post-handshake scheduler scan");

    // ---------------------------
    // Crawl from a fresh peer
    // ---------------------------

    // Carol asks Alice for her newest block and walks the chain down.
    carol
        .handle
        .request_block(alice.candidate.clone(), LATEST_SEQUENCE_NUMBER);

    let mut absorbed = 0u32;
    while let Ok(Some(event)) = timeout(Duration::from_secs(2), carol.events.recv()).await {
        if let ChainEvent::BlockAbsorbed { id } = event {
            info!(%id, "Carol absorbed block");
            absorbed += 1;
        }
    }
    info!(absorbed, "crawl finished");

    info!(
        "metrics snapshot: {} handshakes, {} blocks persisted",
        metrics.ledger.handshakes_completed.get(),
        metrics.ledger.blocks_persisted.get(),
    );
    Ok(())
}
