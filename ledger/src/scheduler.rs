//! Amount scheduler: byte counters that trigger handshakes.
//!
//! The transport reports every transfer to and from a peer; the
//! scheduler accumulates those counts per endpoint and, once the sent
//! counter crosses the configured threshold, asks the protocol engine to
//! run a signature handshake covering the outstanding bytes. Only the
//! sender of bytes initiates — the receiving side is recorded but never
//! triggers, since the counterpart's scheduler will send us a request
//! organically.
//!
//! Accumulators are in-memory only. An accepted initiation clears the
//! peer's entries (the block covers everything outstanding at that
//! moment); a failed one leaves them untouched so the next transfer or
//! [`AmountScheduler::notify_done`] retries.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::network::{Candidate, CandidateDirectory};
use crate::protocol::ProtocolError;
use crate::types::PeerAddr;

/// Configuration for the [`AmountScheduler`].
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of outstanding sent bytes that triggers a handshake.
    pub threshold: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threshold: 1_000_000,
        }
    }
}

/// Capability to start a signature handshake; implemented by the chain
/// actor handle. `Ok` means the request was emitted and the timer armed,
/// not that the handshake already completed.
#[async_trait]
pub trait HandshakeInitiator: Send + Sync {
    async fn initiate(
        &self,
        responder: &Candidate,
        up: u32,
        down: u32,
    ) -> Result<(), ProtocolError>;
}

/// Per-peer byte accumulators driving handshake initiation.
pub struct AmountScheduler<D, I> {
    threshold: u64,
    outstanding_send: HashMap<PeerAddr, u64>,
    outstanding_received: HashMap<PeerAddr, u64>,
    directory: D,
    initiator: I,
}

impl<D, I> AmountScheduler<D, I>
where
    D: CandidateDirectory,
    I: HandshakeInitiator,
{
    pub fn new(config: &SchedulerConfig, directory: D, initiator: I) -> Self {
        Self {
            threshold: config.threshold,
            outstanding_send: HashMap::new(),
            outstanding_received: HashMap::new(),
            directory,
            initiator,
        }
    }

    /// Records `n` bytes sent to `peer` and initiates a handshake once
    /// the peer's counter reaches the threshold.
    pub async fn record_sent(&mut self, peer: PeerAddr, n: u64) {
        let outstanding = self
            .outstanding_send
            .entry(peer)
            .and_modify(|v| *v = v.saturating_add(n))
            .or_insert(n);
        if *outstanding >= self.threshold {
            self.try_initiate(peer).await;
        }
    }

    /// Records `n` bytes received from `peer`. Never initiates: the
    /// counter only feeds the `down` half of a later handshake.
    pub fn record_received(&mut self, peer: PeerAddr, n: u64) {
        self.outstanding_received
            .entry(peer)
            .and_modify(|v| *v = v.saturating_add(n))
            .or_insert(n);
    }

    /// Called after any completed handshake: scans for a peer still over
    /// the threshold and attempts one initiation for it. Returns `true`
    /// if one was launched.
    pub async fn notify_done(&mut self) -> bool {
        let next = self
            .outstanding_send
            .iter()
            .find(|(_, outstanding)| **outstanding >= self.threshold)
            .map(|(peer, _)| *peer);
        match next {
            Some(peer) => self.try_initiate(peer).await,
            None => false,
        }
    }

    /// Outstanding sent bytes for `peer`, if any.
    pub fn outstanding_send(&self, peer: &PeerAddr) -> Option<u64> {
        self.outstanding_send.get(peer).copied()
    }

    /// Outstanding received bytes for `peer`, if any.
    pub fn outstanding_received(&self, peer: &PeerAddr) -> Option<u64> {
        self.outstanding_received.get(peer).copied()
    }

    /// Resolves a candidate and hands the outstanding byte counts to the
    /// engine. Clears the peer's entries only if the engine accepted the
    /// initiation; otherwise the counters stay for the next attempt.
    async fn try_initiate(&mut self, peer: PeerAddr) -> bool {
        let Some(candidate) = self.directory.candidate_for_peer(&peer) else {
            debug!(%peer, "over threshold but no live candidate, keeping accumulator");
            return false;
        };

        let up = clamp_u32(self.outstanding_send.get(&peer).copied().unwrap_or(0));
        let down = clamp_u32(self.outstanding_received.get(&peer).copied().unwrap_or(0));

        match self.initiator.initiate(&candidate, up, down).await {
            Ok(()) => {
                info!(%peer, up, down, "handshake initiated, clearing accumulators");
                self.outstanding_send.remove(&peer);
                self.outstanding_received.remove(&peer);
                true
            }
            Err(e) => {
                debug!(%peer, "initiation failed ({e}), keeping accumulator");
                false
            }
        }
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::crypto::{Ed25519Signer, Signer};
    use crate::types::PublicKey;

    /// Initiator fake with a scripted outcome per call.
    #[derive(Default)]
    struct ScriptedInitiator {
        accept: Mutex<Vec<bool>>,
        calls: Mutex<Vec<(Candidate, u32, u32)>>,
    }

    impl ScriptedInitiator {
        fn accepting(outcomes: &[bool]) -> Self {
            ScriptedInitiator {
                accept: Mutex::new(outcomes.iter().rev().copied().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Candidate, u32, u32)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl HandshakeInitiator for &ScriptedInitiator {
        async fn initiate(
            &self,
            responder: &Candidate,
            up: u32,
            down: u32,
        ) -> Result<(), ProtocolError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((responder.clone(), up, down));
            let accepted = self.accept.lock().expect("accept lock").pop().unwrap_or(true);
            if accepted {
                Ok(())
            } else {
                Err(ProtocolError::EngineBusy)
            }
        }
    }

    struct StaticDirectory {
        by_peer: HashMap<PeerAddr, Candidate>,
    }

    impl StaticDirectory {
        fn knowing(peers: &[PeerAddr]) -> Self {
            let key = Ed25519Signer::from_seed([9; 32]).public_key();
            let by_peer = peers
                .iter()
                .map(|peer| {
                    (
                        *peer,
                        Candidate {
                            addr: *peer,
                            public_key: key.clone(),
                        },
                    )
                })
                .collect();
            StaticDirectory { by_peer }
        }

        fn empty() -> Self {
            StaticDirectory {
                by_peer: HashMap::new(),
            }
        }
    }

    impl CandidateDirectory for StaticDirectory {
        fn candidate_for_peer(&self, peer: &PeerAddr) -> Option<Candidate> {
            self.by_peer.get(peer).cloned()
        }

        fn candidate_for_key(&self, _public_key: &PublicKey) -> Option<Candidate> {
            None
        }
    }

    fn addr(port: u16) -> PeerAddr {
        PeerAddr(format!("10.0.0.1:{port}").parse().expect("addr"))
    }

    fn config(threshold: u64) -> SchedulerConfig {
        SchedulerConfig { threshold }
    }

    #[tokio::test]
    async fn threshold_crossing_triggers_and_clears() {
        let peer = addr(4001);
        let initiator = ScriptedInitiator::default();
        let mut scheduler = AmountScheduler::new(
            &config(1_000_000),
            StaticDirectory::knowing(&[peer]),
            &initiator,
        );

        scheduler.record_sent(peer, 600_000).await;
        assert_eq!(scheduler.outstanding_send(&peer), Some(600_000));
        assert!(initiator.calls().is_empty());

        scheduler.record_sent(peer, 600_000).await;
        assert_eq!(scheduler.outstanding_send(&peer), None);

        let calls = initiator.calls();
        assert_eq!(calls.len(), 1);
        let (_, up, down) = &calls[0];
        assert_eq!(*up, 1_200_000);
        assert_eq!(*down, 0);
    }

    #[tokio::test]
    async fn received_bytes_feed_down_but_never_trigger() {
        let peer = addr(4001);
        let initiator = ScriptedInitiator::default();
        let mut scheduler = AmountScheduler::new(
            &config(1_000),
            StaticDirectory::knowing(&[peer]),
            &initiator,
        );

        scheduler.record_received(peer, 50_000);
        assert!(initiator.calls().is_empty());
        assert_eq!(scheduler.outstanding_received(&peer), Some(50_000));

        // The next sent-side trigger carries the received bytes as down.
        scheduler.record_sent(peer, 2_000).await;
        let calls = initiator.calls();
        assert_eq!(calls.len(), 1);
        let (_, up, down) = &calls[0];
        assert_eq!(*up, 2_000);
        assert_eq!(*down, 50_000);
        assert_eq!(scheduler.outstanding_received(&peer), None);
    }

    #[tokio::test]
    async fn missing_candidate_keeps_accumulator() {
        let peer = addr(4001);
        let initiator = ScriptedInitiator::default();
        let mut scheduler =
            AmountScheduler::new(&config(1_000), StaticDirectory::empty(), &initiator);

        scheduler.record_sent(peer, 5_000).await;
        assert_eq!(scheduler.outstanding_send(&peer), Some(5_000));
        assert!(initiator.calls().is_empty());

        // Further transfers keep accumulating on top.
        scheduler.record_sent(peer, 1_000).await;
        assert_eq!(scheduler.outstanding_send(&peer), Some(6_000));
    }

    #[tokio::test]
    async fn refused_initiation_keeps_accumulator() {
        let peer = addr(4001);
        let initiator = ScriptedInitiator::accepting(&[false, true]);
        let mut scheduler = AmountScheduler::new(
            &config(1_000),
            StaticDirectory::knowing(&[peer]),
            &initiator,
        );

        scheduler.record_sent(peer, 1_500).await;
        assert_eq!(scheduler.outstanding_send(&peer), Some(1_500));

        // The retry on the next increment succeeds and clears.
        scheduler.record_sent(peer, 500).await;
        assert_eq!(scheduler.outstanding_send(&peer), None);

        let calls = initiator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, 2_000);
    }

    #[tokio::test]
    async fn notify_done_launches_one_deferred_initiation() {
        let peer_a = addr(4001);
        let peer_b = addr(4002);
        let initiator = ScriptedInitiator::accepting(&[false, true]);
        let mut scheduler = AmountScheduler::new(
            &config(1_000),
            StaticDirectory::knowing(&[peer_a, peer_b]),
            &initiator,
        );

        // peer_a crosses the threshold while the engine is busy.
        scheduler.record_sent(peer_a, 3_000).await;
        assert_eq!(scheduler.outstanding_send(&peer_a), Some(3_000));

        // peer_b stays under it.
        scheduler.record_sent(peer_b, 100).await;

        assert!(scheduler.notify_done().await);
        assert_eq!(scheduler.outstanding_send(&peer_a), None);
        assert_eq!(scheduler.outstanding_send(&peer_b), Some(100));

        // Nothing left over the threshold.
        assert!(!scheduler.notify_done().await);
    }
}
