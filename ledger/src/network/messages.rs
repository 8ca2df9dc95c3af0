//! Typed wire messages of the chain protocol.
//!
//! Signature and block messages carry the canonical payload encoding as
//! raw bytes rather than decoded fields: the requester's signed region
//! must be preserved bit-for-bit through the handshake, and decoding is
//! deferred to the receiving engine so malformed buffers are rejected in
//! exactly one place.

use crate::codec::{self, CodecError};
use crate::types::{Block, PublicKey, Signature};

/// Sentinel sequence number meaning "your latest block".
pub const LATEST_SEQUENCE_NUMBER: i32 = -1;

/// A half-signed signature request: the requester's 40-byte payload
/// prefix plus its authenticator. Not a block; never persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureRequest {
    /// Canonical encoding of the requester half (fields 1–6).
    pub payload: Vec<u8>,
    /// Public key of the requester.
    pub public_key: PublicKey,
    /// Requester signature over `payload`.
    pub signature: Signature,
}

/// A counter-signed signature response carrying the full block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureResponse {
    /// Canonical encoding of the full payload (72 bytes).
    pub payload: Vec<u8>,
    pub public_key_requester: PublicKey,
    pub signature_requester: Signature,
    pub public_key_responder: PublicKey,
    pub signature_responder: Signature,
}

impl SignatureResponse {
    /// Builds the response message for a completed block.
    pub fn from_block(block: &Block) -> Self {
        SignatureResponse {
            payload: block.payload_bytes().to_vec(),
            public_key_requester: block.public_key_requester.clone(),
            signature_requester: block.signature_requester.clone(),
            public_key_responder: block.public_key_responder.clone(),
            signature_responder: block.signature_responder.clone(),
        }
    }

    /// Reconstructs the block carried by this message.
    pub fn block(&self) -> Result<Block, CodecError> {
        let payload = codec::decode_payload(&self.payload)?;
        Ok(Block::from_payload(
            payload,
            self.public_key_requester.clone(),
            self.signature_requester.clone(),
            self.public_key_responder.clone(),
            self.signature_responder.clone(),
        ))
    }
}

/// A crawler's request for the block at a given sequence number in the
/// destination peer's chain. [`LATEST_SEQUENCE_NUMBER`] asks for the
/// newest one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockRequest {
    pub requested_sequence_number: i32,
}

/// A crawler's reply carrying one full block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockResponse {
    /// Canonical encoding of the full payload (72 bytes).
    pub payload: Vec<u8>,
    pub public_key_requester: PublicKey,
    pub signature_requester: Signature,
    pub public_key_responder: PublicKey,
    pub signature_responder: Signature,
}

impl BlockResponse {
    /// Builds the response message for a stored block.
    pub fn from_block(block: &Block) -> Self {
        BlockResponse {
            payload: block.payload_bytes().to_vec(),
            public_key_requester: block.public_key_requester.clone(),
            signature_requester: block.signature_requester.clone(),
            public_key_responder: block.public_key_responder.clone(),
            signature_responder: block.signature_responder.clone(),
        }
    }

    /// Reconstructs the block carried by this message.
    pub fn block(&self) -> Result<Block, CodecError> {
        let payload = codec::decode_payload(&self.payload)?;
        Ok(Block::from_payload(
            payload,
            self.public_key_requester.clone(),
            self.signature_requester.clone(),
            self.public_key_responder.clone(),
            self.signature_responder.clone(),
        ))
    }
}
