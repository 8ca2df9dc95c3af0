//! Chain crawler: backward ancestor discovery.
//!
//! Known blocks reference their predecessors by content hash. The
//! crawler fills the gaps by asking the peers who signed a block for the
//! blocks beneath it, walking each side's chain downwards until it
//! reaches known territory or genesis. The walk terminates because
//! sequence numbers strictly decrease and are bounded below by 1.
//!
//! Crawler methods run on the chain actor task and borrow the store from
//! the engine; they never occupy the handshake's pending slot.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::crypto::verify_signature;
use crate::network::{
    BlockRequest, BlockResponse, Candidate, CandidateDirectory, Transport,
};
use crate::protocol::ProtocolError;
use crate::store::{LedgerStore, StoreError};
use crate::types::{BlockId, PublicKey};

/// Outcome of absorbing a `BlockResponse`.
#[derive(Debug, Eq, PartialEq)]
pub enum AbsorbOutcome {
    /// The block was new; `requests_sent` predecessors were requested.
    Inserted {
        id: BlockId,
        requests_sent: usize,
    },
    /// The block was already persisted; nothing to do.
    AlreadyKnown,
    /// The payload could not be decoded.
    DroppedMalformed,
    /// One of the block's signatures did not verify.
    DroppedInvalid,
}

/// Backward crawler over foreign chains.
pub struct Crawler<T, D> {
    transport: Arc<T>,
    directory: Arc<D>,
}

impl<T, D> Crawler<T, D>
where
    T: Transport,
    D: CandidateDirectory,
{
    pub fn new(transport: Arc<T>, directory: Arc<D>) -> Self {
        Crawler {
            transport,
            directory,
        }
    }

    /// Sends an explicit request for one of `to`'s blocks, seeding a
    /// backward crawl once the response arrives.
    pub fn request_block(&self, to: &Candidate, sequence_number: i32) -> Result<(), ProtocolError> {
        info!(peer = %to.addr, sequence_number, "requesting block");
        self.transport.send_block_request(
            to,
            &BlockRequest {
                requested_sequence_number: sequence_number,
            },
        )?;
        Ok(())
    }

    /// Answers a peer's request for a block of the local chain.
    ///
    /// A negative requested sequence number means "your latest". Returns
    /// `true` if a block was sent; unknown sequence numbers are logged
    /// and ignored.
    pub fn serve_request<S: LedgerStore>(
        &self,
        store: &S,
        local_key: &PublicKey,
        from: &Candidate,
        request: &BlockRequest,
    ) -> Result<bool, ProtocolError> {
        let sequence_number = if request.requested_sequence_number < 0 {
            let latest = store.latest_sequence_number(local_key)?;
            if latest < 0 {
                info!(peer = %from.addr, "no blocks to serve yet");
                return Ok(false);
            }
            latest as i32
        } else {
            request.requested_sequence_number
        };

        match store.get_by_seq_and_pk(sequence_number, local_key)? {
            Some(block) => {
                info!(peer = %from.addr, sequence_number, "serving block");
                self.transport
                    .send_block_response(from, &BlockResponse::from_block(&block))?;
                Ok(true)
            }
            None => {
                info!(peer = %from.addr, sequence_number, "received request for unknown block");
                Ok(false)
            }
        }
    }

    /// Absorbs a crawled block and continues the walk beneath it.
    ///
    /// Re-delivery of a known block is a no-op; an insert race with
    /// another path is swallowed. Both signatures must verify before the
    /// block is accepted.
    pub fn absorb_response<S: LedgerStore>(
        &self,
        store: &mut S,
        response: &BlockResponse,
    ) -> Result<AbsorbOutcome, ProtocolError> {
        let block = match response.block() {
            Ok(block) => block,
            Err(e) => {
                warn!("dropping malformed block response: {e}");
                return Ok(AbsorbOutcome::DroppedMalformed);
            }
        };

        let payload_bytes = block.payload_bytes();
        let (prefix, whole) = codec::split_signable(&payload_bytes);
        let requester_signed =
            verify_signature(&block.public_key_requester, prefix, &block.signature_requester);
        let responder_signed =
            verify_signature(&block.public_key_responder, whole, &block.signature_responder);
        if !requester_signed || !responder_signed {
            warn!("dropping block response with bad signature");
            return Ok(AbsorbOutcome::DroppedInvalid);
        }

        let id = block.id();
        if store.contains(&id)? {
            debug!(%id, "received already known block");
            return Ok(AbsorbOutcome::AlreadyKnown);
        }
        match store.insert(&block) {
            Ok(()) => info!(%id, "persisted crawled block"),
            Err(StoreError::DuplicateBlock) => {
                // Raced with another path between the contains check and
                // the insert; the block is there either way.
                warn!(%id, "crawled block was persisted concurrently");
            }
            Err(e) => return Err(e.into()),
        }

        let mut requests_sent = 0;
        requests_sent += self.crawl_down(
            store,
            &block.previous_hash_requester,
            block.sequence_number_requester - 1,
            &block.public_key_requester,
        )?;
        requests_sent += self.crawl_down(
            store,
            &block.previous_hash_responder,
            block.sequence_number_responder - 1,
            &block.public_key_responder,
        )?;

        Ok(AbsorbOutcome::Inserted { id, requests_sent })
    }

    /// Requests one predecessor on one side of a freshly absorbed block,
    /// if it is still unknown and its owner is reachable.
    fn crawl_down<S: LedgerStore>(
        &self,
        store: &S,
        next_hash: &BlockId,
        sequence_number: i32,
        public_key: &PublicKey,
    ) -> Result<usize, ProtocolError> {
        if sequence_number < 1 {
            debug!("reached genesis block");
            return Ok(0);
        }
        if store.contains(next_hash)? {
            debug!("reached known block");
            return Ok(0);
        }
        let Some(candidate) = self.directory.candidate_for_key(public_key) else {
            debug!("chain owner not among candidates, stopping crawl on this side");
            return Ok(0);
        };

        let request = BlockRequest {
            requested_sequence_number: sequence_number,
        };
        // The crawl is best effort; a refused publish just ends the walk.
        if let Err(e) = self.transport.send_block_request(&candidate, &request) {
            warn!(peer = %candidate.addr, "failed to publish block request: {e}");
            return Ok(0);
        }
        info!(peer = %candidate.addr, sequence_number, "crawling down");
        Ok(1)
    }
}
