//! The chain actor: one task owning the store and the engine.
//!
//! All chain-mutating operations (initiations, inbound requests and
//! responses, crawl absorption) flow through a single mailbox consumed
//! sequentially by one tokio task. The sequential consumer is what keeps
//! each public key's chain gap-free; the engine's pending slot layers
//! the one-in-flight handshake rule on top, so inbound requests that
//! collide with a local initiation are still dropped as back-pressure.
//!
//! Request timeouts are armed per initiation: a timer task posts a
//! [`ChainCommand::RequestTimeout`] carrying the initiation's token, and
//! stale tokens are ignored if the response won the race. Dropping the
//! last [`ChainHandle`] closes the mailbox and stops the actor.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::crawler::{AbsorbOutcome, Crawler};
use crate::crypto::Signer;
use crate::metrics::MetricsRegistry;
use crate::network::{
    BlockRequest, BlockResponse, Candidate, CandidateDirectory, SignatureRequest,
    SignatureResponse, Transport,
};
use crate::protocol::ProtocolConfig;
use crate::protocol::engine::{ChainEngine, RequestOutcome};
use crate::protocol::error::ProtocolError;
use crate::protocol::policy::SignaturePolicy;
use crate::scheduler::HandshakeInitiator;
use crate::store::LedgerStore;
use crate::types::BlockId;

/// Mailbox capacity of the chain actor. Transport deliveries beyond it
/// are dropped, which bounds the work a flooding peer can enqueue.
const MAILBOX_CAPACITY: usize = 64;

/// Commands consumed by the chain actor.
pub enum ChainCommand {
    /// Start a handshake; the reply reports whether the request was
    /// emitted.
    Initiate {
        responder: Candidate,
        up: u32,
        down: u32,
        reply: oneshot::Sender<Result<(), ProtocolError>>,
    },
    /// An inbound signature request from the overlay.
    SignatureRequest {
        from: Candidate,
        request: SignatureRequest,
    },
    /// An inbound counter-signed response.
    SignatureResponse { response: SignatureResponse },
    /// A crawler asking for one of our blocks.
    BlockRequest {
        from: Candidate,
        request: BlockRequest,
    },
    /// A crawled block arriving.
    BlockResponse { response: BlockResponse },
    /// Ask `to` for a block of its chain, starting a crawl.
    RequestBlock {
        to: Candidate,
        sequence_number: i32,
    },
    /// The timer of the initiation identified by `token` fired.
    RequestTimeout { token: u64 },
}

/// Notifications published by the chain actor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainEvent {
    /// A handshake completed on either role and its block is persisted.
    HandshakeCompleted {
        id: BlockId,
        sequence_number: i32,
    },
    /// An initiation was abandoned after the request timeout.
    HandshakeTimedOut,
    /// The crawler absorbed a previously unknown block.
    BlockAbsorbed { id: BlockId },
}

/// Cloneable handle feeding the chain actor's mailbox.
#[derive(Clone)]
pub struct ChainHandle {
    tx: mpsc::Sender<ChainCommand>,
}

impl ChainHandle {
    /// Starts a handshake with `responder` covering `up`/`down` bytes.
    ///
    /// Resolves once the request is emitted (or refused); completion is
    /// reported through the event channel.
    pub async fn initiate(
        &self,
        responder: &Candidate,
        up: u32,
        down: u32,
    ) -> Result<(), ProtocolError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ChainCommand::Initiate {
                responder: responder.clone(),
                up,
                down,
                reply,
            })
            .await
            .map_err(|_| ProtocolError::Closed)?;
        response.await.map_err(|_| ProtocolError::Closed)?
    }

    /// Hands an inbound signature request to the actor. Returns `false`
    /// if the mailbox is full or closed; the message is then dropped.
    pub fn deliver_signature_request(&self, from: Candidate, request: SignatureRequest) -> bool {
        self.try_send(ChainCommand::SignatureRequest { from, request })
    }

    /// Hands an inbound signature response to the actor.
    pub fn deliver_signature_response(&self, response: SignatureResponse) -> bool {
        self.try_send(ChainCommand::SignatureResponse { response })
    }

    /// Hands an inbound block request to the actor.
    pub fn deliver_block_request(&self, from: Candidate, request: BlockRequest) -> bool {
        self.try_send(ChainCommand::BlockRequest { from, request })
    }

    /// Hands an inbound block response to the actor.
    pub fn deliver_block_response(&self, response: BlockResponse) -> bool {
        self.try_send(ChainCommand::BlockResponse { response })
    }

    /// Asks `to` for the block at `sequence_number` in its chain
    /// (negative for its latest), seeding a backward crawl.
    pub fn request_block(&self, to: Candidate, sequence_number: i32) -> bool {
        self.try_send(ChainCommand::RequestBlock {
            to,
            sequence_number,
        })
    }

    fn try_send(&self, command: ChainCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("chain actor mailbox full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("chain actor gone, dropping message");
                false
            }
        }
    }
}

#[async_trait]
impl HandshakeInitiator for ChainHandle {
    async fn initiate(
        &self,
        responder: &Candidate,
        up: u32,
        down: u32,
    ) -> Result<(), ProtocolError> {
        ChainHandle::initiate(self, responder, up, down).await
    }
}

/// Spawns the chain actor around a store and local identity.
///
/// Returns the command handle, the event stream, and the actor's join
/// handle. The actor stops once every [`ChainHandle`] is dropped and
/// the mailbox drains.
pub fn spawn_chain_actor<S, T, P, D>(
    store: S,
    signer: Arc<dyn Signer>,
    transport: Arc<T>,
    directory: Arc<D>,
    policy: P,
    config: ProtocolConfig,
    metrics: Arc<MetricsRegistry>,
) -> (
    ChainHandle,
    mpsc::UnboundedReceiver<ChainEvent>,
    JoinHandle<()>,
)
where
    S: LedgerStore + 'static,
    T: Transport + 'static,
    P: SignaturePolicy + 'static,
    D: CandidateDirectory + 'static,
{
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let engine = ChainEngine::new(store, signer, transport.clone(), policy);
    let crawler = Crawler::new(transport, directory);
    let actor = ChainActor {
        engine,
        crawler,
        // Weak, so timers never keep a handle-less actor alive.
        timer_tx: tx.downgrade(),
        events: events_tx,
        metrics,
        request_timeout: config.request_timeout,
        initiated_at: None,
    };

    let join = tokio::spawn(actor.run(rx));
    (ChainHandle { tx }, events_rx, join)
}

struct ChainActor<S, T, P, D> {
    engine: ChainEngine<S, T, P>,
    crawler: Crawler<T, D>,
    timer_tx: mpsc::WeakSender<ChainCommand>,
    events: mpsc::UnboundedSender<ChainEvent>,
    metrics: Arc<MetricsRegistry>,
    request_timeout: std::time::Duration,
    /// When the outstanding initiation was emitted, for the duration
    /// histogram.
    initiated_at: Option<Instant>,
}

impl<S, T, P, D> ChainActor<S, T, P, D>
where
    S: LedgerStore + 'static,
    T: Transport + 'static,
    P: SignaturePolicy + 'static,
    D: CandidateDirectory + 'static,
{
    async fn run(mut self, mut rx: mpsc::Receiver<ChainCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                ChainCommand::Initiate {
                    responder,
                    up,
                    down,
                    reply,
                } => self.on_initiate(&responder, up, down, reply),
                ChainCommand::SignatureRequest { from, request } => {
                    self.on_signature_request(&from, &request);
                }
                ChainCommand::SignatureResponse { response } => {
                    self.on_signature_response(&response);
                }
                ChainCommand::BlockRequest { from, request } => {
                    self.on_block_request(&from, &request);
                }
                ChainCommand::BlockResponse { response } => {
                    self.on_block_response(&response);
                }
                ChainCommand::RequestBlock {
                    to,
                    sequence_number,
                } => self.on_request_block(&to, sequence_number),
                ChainCommand::RequestTimeout { token } => self.on_timeout(token),
            }
        }
        debug!("chain actor mailbox closed, stopping");
    }

    fn on_initiate(
        &mut self,
        responder: &Candidate,
        up: u32,
        down: u32,
        reply: oneshot::Sender<Result<(), ProtocolError>>,
    ) {
        match self.engine.begin_initiation(responder, up, down) {
            Ok(token) => {
                self.initiated_at = Some(Instant::now());
                let timer_tx = self.timer_tx.clone();
                let timeout = self.request_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(tx) = timer_tx.upgrade() {
                        let _ = tx.send(ChainCommand::RequestTimeout { token }).await;
                    }
                });
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn on_signature_request(&mut self, from: &Candidate, request: &SignatureRequest) {
        match self.engine.handle_signature_request(from, request) {
            Ok(RequestOutcome::Signed(block)) => {
                self.metrics.ledger.handshakes_completed.inc();
                self.metrics.ledger.blocks_persisted.inc();
                let _ = self.events.send(ChainEvent::HandshakeCompleted {
                    id: block.id(),
                    sequence_number: block.sequence_number_responder,
                });
            }
            Ok(RequestOutcome::DroppedBusy) => {
                self.metrics.ledger.requests_dropped_busy.inc();
            }
            Ok(_) => {}
            Err(e) => error!("failed to process signature request: {e}"),
        }
    }

    fn on_signature_response(&mut self, response: &SignatureResponse) {
        match self.engine.handle_signature_response(response) {
            Ok(Some(block)) => {
                self.metrics.ledger.handshakes_completed.inc();
                self.metrics.ledger.blocks_persisted.inc();
                if let Some(initiated_at) = self.initiated_at.take() {
                    self.metrics
                        .ledger
                        .handshake_duration_seconds
                        .observe(initiated_at.elapsed().as_secs_f64());
                }
                let _ = self.events.send(ChainEvent::HandshakeCompleted {
                    id: block.id(),
                    sequence_number: block.sequence_number_requester,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("signature response dropped: {e}"),
        }
    }

    fn on_block_request(&mut self, from: &Candidate, request: &BlockRequest) {
        let local_key = self.engine.public_key().clone();
        if let Err(e) = self
            .crawler
            .serve_request(self.engine.store(), &local_key, from, request)
        {
            warn!("failed to serve block request: {e}");
        }
    }

    fn on_block_response(&mut self, response: &BlockResponse) {
        match self.crawler.absorb_response(self.engine.store_mut(), response) {
            Ok(AbsorbOutcome::Inserted { id, requests_sent }) => {
                self.metrics.ledger.blocks_persisted.inc();
                self.metrics
                    .ledger
                    .crawl_requests_sent
                    .inc_by(requests_sent as u64);
                let _ = self.events.send(ChainEvent::BlockAbsorbed { id });
            }
            Ok(_) => {}
            Err(e) => error!("failed to absorb block response: {e}"),
        }
    }

    fn on_request_block(&mut self, to: &Candidate, sequence_number: i32) {
        if let Err(e) = self.crawler.request_block(to, sequence_number) {
            warn!("failed to publish block request: {e}");
        } else {
            self.metrics.ledger.crawl_requests_sent.inc();
        }
    }

    fn on_timeout(&mut self, token: u64) {
        if self.engine.handle_timeout(token) {
            self.metrics.ledger.handshakes_timed_out.inc();
            self.initiated_at = None;
            let _ = self.events.send(ChainEvent::HandshakeTimedOut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::crypto::{Ed25519Signer, Signer};
    use crate::network::TransportError;
    use crate::protocol::engine::tests::RecordingTransport;
    use crate::protocol::policy::AcceptAll;
    use crate::store::MemoryStore;
    use crate::types::{PeerAddr, PublicKey};

    /// Transport that routes messages straight into other actors'
    /// mailboxes, keyed by destination endpoint.
    #[derive(Default)]
    struct RoutedTransport {
        routes: Mutex<HashMap<PeerAddr, (Candidate, ChainHandle)>>,
    }

    impl RoutedTransport {
        fn register(&self, local: Candidate, handle: ChainHandle) {
            self.routes
                .lock()
                .expect("routes lock")
                .insert(local.addr, (local, handle));
        }

        fn route(&self, to: &Candidate) -> Option<(Candidate, ChainHandle)> {
            self.routes.lock().expect("routes lock").get(&to.addr).cloned()
        }
    }

    impl Transport for RoutedTransport {
        fn send_signature_request(
            &self,
            to: &Candidate,
            request: &SignatureRequest,
        ) -> Result<(), TransportError> {
            let (_, handle) = self
                .route(to)
                .ok_or_else(|| TransportError::SendFailed("unknown destination".into()))?;
            let from = self.sender_candidate(&request.public_key);
            handle.deliver_signature_request(from, request.clone());
            Ok(())
        }

        fn send_signature_response(
            &self,
            to: &Candidate,
            response: &SignatureResponse,
        ) -> Result<(), TransportError> {
            let (_, handle) = self
                .route(to)
                .ok_or_else(|| TransportError::SendFailed("unknown destination".into()))?;
            handle.deliver_signature_response(response.clone());
            Ok(())
        }

        fn send_block_request(
            &self,
            _to: &Candidate,
            _request: &BlockRequest,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn send_block_response(
            &self,
            _to: &Candidate,
            _response: &BlockResponse,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    impl RoutedTransport {
        /// Looks up the registered candidate presenting `key`, so the
        /// receiver learns an authenticated source.
        fn sender_candidate(&self, key: &PublicKey) -> Candidate {
            self.routes
                .lock()
                .expect("routes lock")
                .values()
                .map(|(candidate, _)| candidate.clone())
                .find(|candidate| candidate.public_key == *key)
                .expect("sender is registered")
        }
    }

    /// Directory fake that knows nobody.
    struct EmptyDirectory;

    impl CandidateDirectory for EmptyDirectory {
        fn candidate_for_peer(&self, _peer: &PeerAddr) -> Option<Candidate> {
            None
        }

        fn candidate_for_key(&self, _public_key: &PublicKey) -> Option<Candidate> {
            None
        }
    }

    fn candidate(port: u16, signer: &Ed25519Signer) -> Candidate {
        Candidate {
            addr: PeerAddr(format!("127.0.0.1:{port}").parse().expect("addr")),
            public_key: signer.public_key(),
        }
    }

    fn spawn_peer<T: Transport + 'static>(
        seed: u8,
        transport: Arc<T>,
    ) -> (
        Arc<Ed25519Signer>,
        ChainHandle,
        mpsc::UnboundedReceiver<ChainEvent>,
    ) {
        let signer = Arc::new(Ed25519Signer::from_seed([seed; 32]));
        let metrics = Arc::new(MetricsRegistry::new().expect("metrics"));
        let (handle, events, _join) = spawn_chain_actor(
            MemoryStore::new(),
            signer.clone(),
            transport,
            Arc::new(EmptyDirectory),
            AcceptAll,
            ProtocolConfig::default(),
            metrics,
        );
        (signer, handle, events)
    }

    #[tokio::test]
    async fn handshake_completes_through_two_actors() {
        let transport = Arc::new(RoutedTransport::default());

        let (alice_signer, alice, mut alice_events) = spawn_peer(1, transport.clone());
        let (bob_signer, bob, mut bob_events) = spawn_peer(2, transport.clone());

        let alice_candidate = candidate(6001, &alice_signer);
        let bob_candidate = candidate(6002, &bob_signer);
        transport.register(alice_candidate.clone(), alice.clone());
        transport.register(bob_candidate.clone(), bob.clone());

        alice
            .initiate(&bob_candidate, 100, 0)
            .await
            .expect("initiate");

        let bob_event = bob_events.recv().await.expect("bob event");
        let alice_event = alice_events.recv().await.expect("alice event");
        match (&alice_event, &bob_event) {
            (
                ChainEvent::HandshakeCompleted { id: a, sequence_number: 1 },
                ChainEvent::HandshakeCompleted { id: b, sequence_number: 1 },
            ) => assert_eq!(a, b),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_frees_the_engine_for_new_initiations() {
        // A recording transport never responds, so the request can only
        // resolve through its timer.
        let transport = Arc::new(RecordingTransport::default());
        let (_signer, handle, mut events) = spawn_peer(1, transport.clone());

        let silent = candidate(6002, &Ed25519Signer::from_seed([2; 32]));
        handle.initiate(&silent, 10, 0).await.expect("initiate");

        // Paused time fast-forwards through the 5 s request timeout.
        let event = events.recv().await.expect("event");
        assert_eq!(event, ChainEvent::HandshakeTimedOut);

        handle
            .initiate(&silent, 10, 0)
            .await
            .expect("slot is free again");
    }

    #[tokio::test]
    async fn second_initiation_is_refused_while_pending() {
        let transport = Arc::new(RecordingTransport::default());
        let (_signer, handle, _events) = spawn_peer(1, transport.clone());

        let silent = candidate(6002, &Ed25519Signer::from_seed([2; 32]));
        handle.initiate(&silent, 10, 0).await.expect("initiate");

        match handle.initiate(&silent, 10, 0).await {
            Err(ProtocolError::EngineBusy) => {}
            other => panic!("expected EngineBusy, got {other:?}"),
        }
    }
}
