//! Network-facing seams of the ledger.
//!
//! The overlay transport and the peer-discovery service are external
//! collaborators. This module captures exactly the capabilities the core
//! needs from them: sending typed, authenticated messages to a candidate
//! ([`Transport`]) and resolving live candidates by network endpoint or
//! by public key ([`CandidateDirectory`]). Message framing, source
//! authentication, and delivery are the transport's concern.

use std::fmt;

use crate::types::{PeerAddr, PublicKey};

pub mod messages;

pub use messages::{
    BlockRequest, BlockResponse, LATEST_SEQUENCE_NUMBER, SignatureRequest, SignatureResponse,
};

/// A remote peer instance known to the discovery service: a reachable
/// endpoint plus the identity it presented.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Candidate {
    pub addr: PeerAddr,
    pub public_key: PublicKey,
}

/// Error raised when a message cannot be handed to the overlay.
#[derive(Debug)]
pub enum TransportError {
    /// The transport refused or failed to publish the message.
    SendFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::SendFailed(msg) => write!(f, "send failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound message transport.
///
/// Implementations deliver each message to the destination candidate
/// with the sender authenticated; a returned error means the message was
/// not published and the caller may retry later.
pub trait Transport: Send + Sync {
    fn send_signature_request(
        &self,
        to: &Candidate,
        request: &SignatureRequest,
    ) -> Result<(), TransportError>;

    fn send_signature_response(
        &self,
        to: &Candidate,
        response: &SignatureResponse,
    ) -> Result<(), TransportError>;

    fn send_block_request(
        &self,
        to: &Candidate,
        request: &BlockRequest,
    ) -> Result<(), TransportError>;

    fn send_block_response(
        &self,
        to: &Candidate,
        response: &BlockResponse,
    ) -> Result<(), TransportError>;
}

/// Read-only view of the discovery service's candidate table.
pub trait CandidateDirectory: Send + Sync {
    /// Resolves a live candidate by its network endpoint. Used by the
    /// scheduler when a byte counter crosses the threshold.
    fn candidate_for_peer(&self, peer: &PeerAddr) -> Option<Candidate>;

    /// Resolves a live candidate by the public key it presented. Used by
    /// the crawler to chase a chain's owner.
    fn candidate_for_key(&self, public_key: &PublicKey) -> Option<Candidate>;
}

impl<D> CandidateDirectory for std::sync::Arc<D>
where
    D: CandidateDirectory + ?Sized,
{
    fn candidate_for_peer(&self, peer: &PeerAddr) -> Option<Candidate> {
        (**self).candidate_for_peer(peer)
    }

    fn candidate_for_key(&self, public_key: &PublicKey) -> Option<Candidate> {
        (**self).candidate_for_key(public_key)
    }
}
