//! Core domain types used by the ledger
//!
//! This module defines strongly-typed block identifiers, key and signature
//! wrappers, and the peer endpoint type shared across the ledger
//! implementation. The goal is to avoid "naked" byte buffers in public
//! APIs and instead use domain-specific newtypes.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Block data structures and canonical hashing.
pub mod block;

pub use block::{Block, Payload, RequestHalf, ResponderHalf};

/// Length in bytes of all block identifiers (SHA-1 digests).
pub const HASH_LEN: usize = 20;

/// Strongly-typed 160-bit block identifier (SHA-1).
///
/// This type is the content hash of a block's canonical payload encoding
/// and doubles as the predecessor reference stored inside payloads.
/// Wrapping the underlying byte array avoids passing raw buffers around
/// in public APIs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BlockId(pub [u8; HASH_LEN]);

impl BlockId {
    /// The reserved predecessor id of the first block in any chain.
    ///
    /// Both peers of an interaction must agree on this marker for
    /// chain-linkage verification to work; this implementation fixes it
    /// to twenty zero bytes.
    pub const GENESIS: BlockId = BlockId([0u8; HASH_LEN]);

    /// Computes a new [`BlockId`] as the SHA-1 hash of `data`.
    ///
    /// The result is deterministic for a given byte slice. It is a
    /// content identifier, not a password hash or KDF.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        BlockId(digest.into())
    }

    /// Returns the underlying 20-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Returns `true` if this id is the genesis marker.
    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }
}

impl TryFrom<&[u8]> for BlockId {
    type Error = ();

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| ())?;
        Ok(BlockId(arr))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Public key bytes of a peer, wrapped to avoid naked `Vec<u8>`.
///
/// This type is intentionally opaque: it does not interpret or validate
/// the key material, it only carries it through the API in a structured
/// way. The encoding is scheme-specific and must match whatever the
/// signing implementation expects (e.g. a 32-byte Ed25519 verifying key).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    /// Returns the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Detached signature bytes, as produced by the configured signer.
///
/// These are signatures over a canonical payload encoding. Which bytes a
/// signature covers is defined by the protocol layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Network endpoint identifying a remote peer (IP address + port).
///
/// Scheduler accumulators and candidate lookups are keyed by this type.
/// It identifies an *instance* on the overlay, not an identity; the
/// identity is the peer's [`PublicKey`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerAddr(pub SocketAddr);

impl PeerAddr {
    /// Returns the wrapped socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr(addr)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_is_deterministic() {
        let a = BlockId::compute(b"some payload bytes");
        let b = BlockId::compute(b"some payload bytes");
        assert_eq!(a, b);
        assert_ne!(a, BlockId::compute(b"other payload bytes"));
    }

    #[test]
    fn genesis_marker_is_all_zeroes() {
        assert_eq!(BlockId::GENESIS.as_bytes(), &[0u8; HASH_LEN]);
        assert!(BlockId::GENESIS.is_genesis());
        assert!(!BlockId::compute(b"x").is_genesis());
    }

    #[test]
    fn block_id_try_from_rejects_wrong_length() {
        assert!(BlockId::try_from([1u8; 19].as_slice()).is_err());
        assert!(BlockId::try_from([1u8; 21].as_slice()).is_err());
        assert!(BlockId::try_from([1u8; 20].as_slice()).is_ok());
    }

    #[test]
    fn peer_addr_display_matches_socket_addr() {
        let addr: SocketAddr = "10.0.0.1:6881".parse().expect("valid addr");
        let peer = PeerAddr(addr);
        assert_eq!(peer.to_string(), "10.0.0.1:6881");
    }
}
