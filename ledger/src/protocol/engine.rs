//! Requester/responder state machine of the signature handshake.
//!
//! [`ChainEngine`] owns the local store and keys and implements both
//! roles of the two-phase exchange. It admits exactly one in-flight
//! chain mutation: an outstanding initiation occupies the single pending
//! slot, inbound requests that collide with it are dropped silently, and
//! the chain actor feeds the engine one message at a time. Together this
//! keeps every public key's sequence numbers gap-free without
//! transactional retries.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::{self, REQUEST_HALF_LEN};
use crate::crypto::{Signer, verify_signature};
use crate::network::{Candidate, SignatureRequest, SignatureResponse, Transport};
use crate::protocol::error::ProtocolError;
use crate::protocol::policy::SignaturePolicy;
use crate::store::{LedgerStore, Side, StoreError};
use crate::types::{Block, BlockId, Payload, PublicKey, RequestHalf, ResponderHalf};

/// Outcome of processing an inbound signature request.
///
/// Only [`Signed`](RequestOutcome::Signed) emits a reply; every other
/// outcome drops the request, which is expected back-pressure rather
/// than an error.
#[derive(Debug, PartialEq)]
pub enum RequestOutcome {
    /// The request was counter-signed, persisted, and answered.
    Signed(Block),
    /// A local chain operation is in flight; the request was dropped.
    DroppedBusy,
    /// The request half could not be decoded.
    DroppedMalformed,
    /// The request failed a validity check.
    DroppedInvalid,
    /// The exact request was already counter-signed earlier.
    DroppedReplay,
    /// The signing policy declined the request.
    Rejected,
}

/// An initiation waiting for its counter-signed response.
struct PendingRequest {
    token: u64,
    half_bytes: Vec<u8>,
    responder: Candidate,
}

/// The two-party handshake engine for the local chain.
///
/// Generic over the store backend `S`, the outbound transport `T`, and
/// the responder-side signing policy `P`. All methods take `&mut self`;
/// the chain actor serializes access.
pub struct ChainEngine<S, T, P> {
    store: S,
    transport: Arc<T>,
    policy: P,
    signer: Arc<dyn Signer>,
    public_key: PublicKey,
    pending: Option<PendingRequest>,
    next_token: u64,
}

impl<S, T, P> ChainEngine<S, T, P>
where
    S: LedgerStore,
    T: Transport,
    P: SignaturePolicy,
{
    /// Creates a new engine around the local store and identity.
    pub fn new(store: S, signer: Arc<dyn Signer>, transport: Arc<T>, policy: P) -> Self {
        let public_key = signer.public_key();
        Self {
            store,
            transport,
            policy,
            signer,
            public_key,
            pending: None,
            next_token: 0,
        }
    }

    /// The local public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a mutable reference to the underlying store.
    ///
    /// Used by the crawler, which runs on the same actor task; protocol
    /// logic goes through the handshake methods.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Returns `true` if an initiation is waiting for its response.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts a handshake with `responder` covering `up`/`down` bytes.
    ///
    /// Builds the requester half from the local chain state, signs its
    /// prefix, emits the request, and occupies the pending slot. Returns
    /// the token identifying this attempt; the caller arms the request
    /// timer with it. Fails with [`ProtocolError::EngineBusy`] if a
    /// chain operation is already in flight, and leaves no pending state
    /// behind if the transport refuses the message.
    pub fn begin_initiation(
        &mut self,
        responder: &Candidate,
        up: u32,
        down: u32,
    ) -> Result<u64, ProtocolError> {
        if self.pending.is_some() {
            debug!("initiation refused, chain operation already in flight");
            return Err(ProtocolError::EngineBusy);
        }

        let half = self.next_request_half(up, down)?;
        let half_bytes = codec::encode_request_half(&half).to_vec();
        let signature = self.signer.sign(&half_bytes);
        let request = SignatureRequest {
            payload: half_bytes.clone(),
            public_key: self.public_key.clone(),
            signature,
        };
        self.transport.send_signature_request(responder, &request)?;

        let token = self.next_token;
        self.next_token += 1;
        self.pending = Some(PendingRequest {
            token,
            half_bytes,
            responder: responder.clone(),
        });
        info!(
            peer = %responder.addr,
            sequence_number = half.sequence_number,
            up,
            down,
            "sent signature request"
        );
        Ok(token)
    }

    /// Clears the pending slot if `token` still identifies it.
    ///
    /// Returns `true` if a pending initiation was abandoned. Stale
    /// tokens (the response won the race) are ignored.
    pub fn handle_timeout(&mut self, token: u64) -> bool {
        let timed_out = matches!(&self.pending, Some(pending) if pending.token == token);
        if timed_out {
            warn!("signature request timed out, no block was created");
            self.pending = None;
        }
        timed_out
    }

    /// Processes a counter-signed response to our outstanding request.
    ///
    /// On success the completed block is persisted and returned. A
    /// response that arrives with no pending context (late, or never
    /// asked for) is dropped with `Ok(None)`. A malformed payload leaves
    /// the pending slot armed — the request timer will clear it — while
    /// a well-formed but invalid response abandons the attempt
    /// immediately.
    pub fn handle_signature_response(
        &mut self,
        response: &SignatureResponse,
    ) -> Result<Option<Block>, ProtocolError> {
        let Some(pending) = self.pending.as_ref() else {
            debug!("dropping signature response without a pending request");
            return Ok(None);
        };
        let expected_half = pending.half_bytes.clone();
        let expected_responder = pending.responder.public_key.clone();

        let block = match response.block() {
            Ok(block) => block,
            Err(e) => {
                warn!("dropping malformed signature response: {e}");
                return Err(e.into());
            }
        };

        let untampered = response.payload[..REQUEST_HALF_LEN] == expected_half[..];
        let keys_match = response.public_key_requester == self.public_key
            && response.public_key_responder == expected_responder;
        let responder_signed = verify_signature(
            &response.public_key_responder,
            &response.payload,
            &response.signature_responder,
        );
        if !untampered || !keys_match || !responder_signed {
            warn!("dropping invalid signature response, abandoning request");
            self.pending = None;
            return Err(ProtocolError::SignatureInvalid);
        }

        match self.store.insert(&block) {
            Ok(()) => {}
            Err(StoreError::DuplicateBlock) => {
                warn!(id = %block.id(), "counter-signed block was already persisted");
            }
            Err(e) => {
                // Surface the failure, but never leave the slot occupied.
                tracing::error!("failed to persist counter-signed block: {e}");
                self.pending = None;
                return Err(e.into());
            }
        }
        self.pending = None;
        info!(
            id = %block.id(),
            sequence_number = block.sequence_number_requester,
            "handshake complete, block persisted"
        );
        Ok(Some(block))
    }

    /// Processes an inbound signature request from `from`.
    ///
    /// Runs the validity checks, consults the signing policy, and on
    /// acceptance counter-signs, persists, and replies with the full
    /// block. See [`RequestOutcome`] for the drop cases.
    pub fn handle_signature_request(
        &mut self,
        from: &Candidate,
        request: &SignatureRequest,
    ) -> Result<RequestOutcome, ProtocolError> {
        if self.pending.is_some() {
            debug!(peer = %from.addr, "dropping signature request, chain operation in flight");
            return Ok(RequestOutcome::DroppedBusy);
        }

        let half = match codec::decode_request_half(&request.payload) {
            Ok(half) => half,
            Err(e) => {
                warn!(peer = %from.addr, "dropping malformed signature request: {e}");
                return Ok(RequestOutcome::DroppedMalformed);
            }
        };

        if !verify_signature(&request.public_key, &request.payload, &request.signature) {
            warn!(peer = %from.addr, "dropping signature request with bad signature");
            return Ok(RequestOutcome::DroppedInvalid);
        }
        if half.sequence_number < 1 {
            warn!(peer = %from.addr, "dropping signature request with reserved sequence number");
            return Ok(RequestOutcome::DroppedInvalid);
        }
        if !self.requester_totals_plausible(&request.public_key, &half)? {
            warn!(peer = %from.addr, "dropping signature request with regressing totals");
            return Ok(RequestOutcome::DroppedInvalid);
        }

        if self
            .store
            .contains_signature(&request.signature, &request.public_key)?
        {
            info!(peer = %from.addr, "already counter-signed this request, dropping replay");
            return Ok(RequestOutcome::DroppedReplay);
        }

        if !self.policy.should_sign(&request.public_key, &half) {
            info!(peer = %from.addr, "signing policy declined request");
            return Ok(RequestOutcome::Rejected);
        }

        let responder_half = self.next_responder_half(half.up, half.down)?;

        // The requester's signed bytes travel through verbatim; our half
        // is appended to exactly what they sent.
        let mut payload_bytes = request.payload.clone();
        payload_bytes.extend_from_slice(&codec::encode_responder_half(&responder_half));
        let signature_responder = self.signer.sign(&payload_bytes);

        let block = Block::from_payload(
            Payload::from_halves(&half, &responder_half),
            request.public_key.clone(),
            request.signature.clone(),
            self.public_key.clone(),
            signature_responder,
        );

        match self.store.insert(&block) {
            Ok(()) => {}
            Err(StoreError::DuplicateBlock) => {
                warn!(id = %block.id(), "block from identical interaction already persisted");
            }
            Err(e) => return Err(e.into()),
        }

        let response = SignatureResponse::from_block(&block);
        self.transport.send_signature_response(from, &response)?;
        info!(
            peer = %from.addr,
            id = %block.id(),
            sequence_number = block.sequence_number_responder,
            "counter-signed request, block persisted"
        );
        Ok(RequestOutcome::Signed(block))
    }

    /// Builds our next requester half for an interaction of `up`/`down`
    /// bytes, from the current chain state.
    fn next_request_half(&self, up: u32, down: u32) -> Result<RequestHalf, ProtocolError> {
        let (total_up, total_down, sequence_number, previous_hash) = self.next_chain_state()?;
        Ok(RequestHalf {
            up,
            down,
            total_up: total_up.saturating_add(up),
            total_down: total_down.saturating_add(down),
            sequence_number,
            previous_hash,
        })
    }

    /// Builds our next responder half; totals grow by the same `up` and
    /// `down` the requester declared for the interaction.
    fn next_responder_half(&self, up: u32, down: u32) -> Result<ResponderHalf, ProtocolError> {
        let (total_up, total_down, sequence_number, previous_hash) = self.next_chain_state()?;
        Ok(ResponderHalf {
            total_up: total_up.saturating_add(up),
            total_down: total_down.saturating_add(down),
            sequence_number,
            previous_hash,
        })
    }

    /// Reads `(total_up, total_down, next_sequence_number, latest_hash)`
    /// for the local key. `latest_sequence_number` reports `-1` for an
    /// empty chain, so the first block lands at sequence number 1.
    fn next_chain_state(&self) -> Result<(u32, u32, i32, BlockId), ProtocolError> {
        let latest = self.store.latest_sequence_number(&self.public_key)?;
        let sequence_number = (latest.max(0) + 1) as i32;
        let previous_hash = self
            .store
            .previous_id(&self.public_key)?
            .unwrap_or(BlockId::GENESIS);
        let (total_up, total_down) = self.store.totals(&self.public_key)?.unwrap_or((0, 0));
        Ok((total_up, total_down, sequence_number, previous_hash))
    }

    /// Trust-but-verify check on a requester's claimed totals: if we
    /// hold the claimed predecessor, the new totals must not regress
    /// the requester's side of it. Without the predecessor we cannot
    /// check the foreign chain and accept the claim as-is.
    fn requester_totals_plausible(
        &self,
        requester: &PublicKey,
        half: &RequestHalf,
    ) -> Result<bool, ProtocolError> {
        let Some(previous) = self.store.get(&half.previous_hash)? else {
            return Ok(true);
        };
        let side = if previous.public_key_requester == *requester {
            Side::Requester
        } else if previous.public_key_responder == *requester {
            Side::Responder
        } else {
            // The claimed predecessor does not involve the requester.
            return Ok(false);
        };
        let (prev_up, prev_down) = side.totals(&previous);
        Ok(half.total_up >= prev_up && half.total_down >= prev_down)
    }
}
