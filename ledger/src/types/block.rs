//! Block types and hashing.
//!
//! This module defines the immutable, doubly-signed record of a single
//! bilateral interaction, together with the requester/responder halves
//! exchanged during the signature handshake.
//!
//! The canonical encoding of the shared payload is the fixed big-endian
//! layout implemented in [`crate::codec`]; the same bytes are used for
//! signing, for the wire, and for hashing. A block's identity is the
//! SHA-1 digest of that encoding — signatures and public keys are not
//! part of the pre-image.

use crate::codec;
use crate::types::{BlockId, PublicKey, Signature};

/// The requester's half of a signature exchange (payload fields 1–6).
///
/// These are exactly the bytes the requester signs. A half on its own is
/// not a block and is never persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestHalf {
    /// Bytes the requester claims to have sent during this interaction.
    pub up: u32,
    /// Bytes the requester claims to have received.
    pub down: u32,
    /// Requester lifetime upload total after this interaction.
    pub total_up: u32,
    /// Requester lifetime download total after this interaction.
    pub total_down: u32,
    /// Index of this block in the requester's chain (first block is 1).
    pub sequence_number: i32,
    /// Id of the requester's previous block, or the genesis marker.
    pub previous_hash: BlockId,
}

/// The responder's half of a signature exchange (payload fields 7–10).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResponderHalf {
    /// Responder lifetime upload total after this interaction.
    pub total_up: u32,
    /// Responder lifetime download total after this interaction.
    pub total_down: u32,
    /// Index of this block in the responder's chain (first block is 1).
    pub sequence_number: i32,
    /// Id of the responder's previous block, or the genesis marker.
    pub previous_hash: BlockId,
}

/// The shared payload of a block: everything both parties sign.
///
/// Field order matches the canonical wire layout. Public keys and
/// signatures are deliberately absent; they are wire-adjacent metadata
/// attached by the transport authenticator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Payload {
    pub up: u32,
    pub down: u32,
    pub total_up_requester: u32,
    pub total_down_requester: u32,
    pub sequence_number_requester: i32,
    pub previous_hash_requester: BlockId,
    pub total_up_responder: u32,
    pub total_down_responder: u32,
    pub sequence_number_responder: i32,
    pub previous_hash_responder: BlockId,
}

impl Payload {
    /// Assembles a payload from the two signed halves.
    pub fn from_halves(requester: &RequestHalf, responder: &ResponderHalf) -> Self {
        Payload {
            up: requester.up,
            down: requester.down,
            total_up_requester: requester.total_up,
            total_down_requester: requester.total_down,
            sequence_number_requester: requester.sequence_number,
            previous_hash_requester: requester.previous_hash,
            total_up_responder: responder.total_up,
            total_down_responder: responder.total_down,
            sequence_number_responder: responder.sequence_number,
            previous_hash_responder: responder.previous_hash,
        }
    }

    /// Returns the requester half of this payload.
    pub fn request_half(&self) -> RequestHalf {
        RequestHalf {
            up: self.up,
            down: self.down,
            total_up: self.total_up_requester,
            total_down: self.total_down_requester,
            sequence_number: self.sequence_number_requester,
            previous_hash: self.previous_hash_requester,
        }
    }

    /// Computes the content id of this payload.
    ///
    /// This is the single chokepoint for id derivation: every path that
    /// reconstructs a block (signature response, crawled response,
    /// database row) derives the id through this function.
    pub fn hash(&self) -> BlockId {
        BlockId::compute(&codec::encode_payload(self))
    }
}

/// Immutable record of one bilateral interaction, signed by both peers.
///
/// A block is created when a signature handshake completes and is
/// persisted exactly once per participant; it is never mutated or
/// deleted afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub up: u32,
    pub down: u32,
    pub total_up_requester: u32,
    pub total_down_requester: u32,
    pub sequence_number_requester: i32,
    pub previous_hash_requester: BlockId,
    pub total_up_responder: u32,
    pub total_down_responder: u32,
    pub sequence_number_responder: i32,
    pub previous_hash_responder: BlockId,
    pub public_key_requester: PublicKey,
    pub signature_requester: Signature,
    pub public_key_responder: PublicKey,
    pub signature_responder: Signature,
}

impl Block {
    /// Builds a block from a shared payload plus both authenticators.
    pub fn from_payload(
        payload: Payload,
        public_key_requester: PublicKey,
        signature_requester: Signature,
        public_key_responder: PublicKey,
        signature_responder: Signature,
    ) -> Self {
        Block {
            up: payload.up,
            down: payload.down,
            total_up_requester: payload.total_up_requester,
            total_down_requester: payload.total_down_requester,
            sequence_number_requester: payload.sequence_number_requester,
            previous_hash_requester: payload.previous_hash_requester,
            total_up_responder: payload.total_up_responder,
            total_down_responder: payload.total_down_responder,
            sequence_number_responder: payload.sequence_number_responder,
            previous_hash_responder: payload.previous_hash_responder,
            public_key_requester,
            signature_requester,
            public_key_responder,
            signature_responder,
        }
    }

    /// Returns the shared payload of this block.
    pub fn payload(&self) -> Payload {
        Payload {
            up: self.up,
            down: self.down,
            total_up_requester: self.total_up_requester,
            total_down_requester: self.total_down_requester,
            sequence_number_requester: self.sequence_number_requester,
            previous_hash_requester: self.previous_hash_requester,
            total_up_responder: self.total_up_responder,
            total_down_responder: self.total_down_responder,
            sequence_number_responder: self.sequence_number_responder,
            previous_hash_responder: self.previous_hash_responder,
        }
    }

    /// Returns the canonical byte encoding of the shared payload.
    ///
    /// All hashing and verification that depends on a "canonical" form
    /// goes through this method to avoid format drift.
    pub fn payload_bytes(&self) -> [u8; codec::PAYLOAD_LEN] {
        codec::encode_payload(&self.payload())
    }

    /// Computes the content id of this block.
    pub fn id(&self) -> BlockId {
        self.payload().hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn dummy_payload() -> Payload {
        Payload {
            up: 100,
            down: 42,
            total_up_requester: 100,
            total_down_requester: 42,
            sequence_number_requester: 1,
            previous_hash_requester: BlockId::GENESIS,
            total_up_responder: 42,
            total_down_responder: 100,
            sequence_number_responder: 3,
            previous_hash_responder: BlockId::compute(b"responder predecessor"),
        }
    }

    #[test]
    fn block_id_is_sha1_of_canonical_payload() {
        let block = Block::from_payload(
            dummy_payload(),
            PublicKey(vec![1; 32]),
            Signature(vec![2; 64]),
            PublicKey(vec![3; 32]),
            Signature(vec![4; 64]),
        );

        let digest: [u8; 20] = Sha1::digest(block.payload_bytes()).into();
        assert_eq!(block.id(), BlockId(digest));
    }

    #[test]
    fn block_id_ignores_keys_and_signatures() {
        let a = Block::from_payload(
            dummy_payload(),
            PublicKey(vec![1; 32]),
            Signature(vec![2; 64]),
            PublicKey(vec![3; 32]),
            Signature(vec![4; 64]),
        );
        let b = Block::from_payload(
            dummy_payload(),
            PublicKey(vec![9; 32]),
            Signature(vec![8; 64]),
            PublicKey(vec![7; 32]),
            Signature(vec![6; 64]),
        );

        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn payload_round_trips_through_halves() {
        let payload = dummy_payload();
        let requester = payload.request_half();
        let responder = ResponderHalf {
            total_up: payload.total_up_responder,
            total_down: payload.total_down_responder,
            sequence_number: payload.sequence_number_responder,
            previous_hash: payload.previous_hash_responder,
        };

        assert_eq!(Payload::from_halves(&requester, &responder), payload);
    }
}
