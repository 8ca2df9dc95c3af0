//! Persistence layer for the interaction ledger.
//!
//! This module defines the [`LedgerStore`] contract used by the protocol
//! engine and the crawler, together with concrete backends:
//!
//! - an in-memory store ([`mem::MemoryStore`]) suitable for tests and
//!   small demos,
//! - a SQLite-backed store ([`sqlite::SqliteStore`]) for persistent
//!   nodes.
//!
//! Blocks are keyed by their content id. Every query treats the two
//! sides of a block symmetrically: a public key "owns" a block whether
//! it appears as requester or as responder, and per-key results are
//! resolved by taking the side with the greatest sequence number. The
//! store is the single source of truth for these per-side views.

use std::fmt;

use crate::types::{Block, BlockId, PublicKey, Signature};

pub mod mem;
pub mod sqlite;

pub use mem::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};

/// Which side of a block a given public key occupies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    Requester,
    Responder,
}

impl Side {
    /// Returns the sequence number of `block` on this side.
    pub fn sequence_number(&self, block: &Block) -> i32 {
        match self {
            Side::Requester => block.sequence_number_requester,
            Side::Responder => block.sequence_number_responder,
        }
    }

    /// Returns the `(total_up, total_down)` pair of `block` on this side.
    pub fn totals(&self, block: &Block) -> (u32, u32) {
        match self {
            Side::Requester => (block.total_up_requester, block.total_down_requester),
            Side::Responder => (block.total_up_responder, block.total_down_responder),
        }
    }
}

/// Storage-level error type.
#[derive(Debug)]
pub enum StoreError {
    /// A block with the same content id is already persisted.
    DuplicateBlock,
    /// The on-disk schema is newer than this build understands.
    SchemaVersion(u32),
    /// A stored row violates the fixed field widths.
    Corrupted(&'static str),
    /// Underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// Filesystem failure while preparing the database location.
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateBlock => write!(f, "block already persisted"),
            StoreError::SchemaVersion(v) => {
                write!(f, "database version {v} is newer than supported; downgrades are unsupported")
            }
            StoreError::Corrupted(msg) => write!(f, "corrupted row: {msg}"),
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Abstract persistence interface for the ledger.
///
/// Implementations must keep blocks immutable once inserted and answer
/// the either-side queries described on each method. All chain-mutating
/// callers are serialized by the chain actor, so implementations do not
/// need internal locking beyond what their backend requires.
pub trait LedgerStore: Send {
    /// Persists a new block. Fails with [`StoreError::DuplicateBlock`]
    /// if a block with the same id already exists.
    fn insert(&mut self, block: &Block) -> Result<(), StoreError>;

    /// Point lookup by content id.
    fn get(&self, id: &BlockId) -> Result<Option<Block>, StoreError>;

    /// Finds the block in which `public_key` occupies either side with
    /// the given sequence number. At most one such block exists for a
    /// well-formed chain.
    fn get_by_seq_and_pk(
        &self,
        sequence_number: i32,
        public_key: &PublicKey,
    ) -> Result<Option<Block>, StoreError>;

    /// Returns `true` if a block with this id is persisted.
    fn contains(&self, id: &BlockId) -> Result<bool, StoreError>;

    /// Returns `true` if a block carrying this requester signature and
    /// requester key is persisted. Used to suppress duplicate
    /// persistence when a signature request is replayed.
    fn contains_signature(
        &self,
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, StoreError>;

    /// Greatest sequence number of `public_key` on either side, or `-1`
    /// if the key has no blocks.
    fn latest_sequence_number(&self, public_key: &PublicKey) -> Result<i64, StoreError>;

    /// Id of the block carrying `public_key`'s greatest sequence number.
    fn previous_id(&self, public_key: &PublicKey) -> Result<Option<BlockId>, StoreError>;

    /// `(total_up, total_down)` of `public_key`'s own side of its latest
    /// block, or `None` if the key has no blocks.
    fn totals(&self, public_key: &PublicKey) -> Result<Option<(u32, u32)>, StoreError>;

    /// Ids of every persisted block, in no particular order.
    fn ids(&self) -> Result<Vec<BlockId>, StoreError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::HASH_LEN;

    pub(crate) fn test_key(byte: u8) -> PublicKey {
        PublicKey(vec![byte; 32])
    }

    pub(crate) fn test_signature(byte: u8) -> Signature {
        Signature(vec![byte; 64])
    }

    /// Builds a block where `requester` is at `seq_req` and `responder`
    /// at `seq_res`, with totals derived from the sequence numbers so
    /// monotonicity is easy to assert.
    pub(crate) fn test_block(
        requester: &PublicKey,
        responder: &PublicKey,
        seq_req: i32,
        seq_res: i32,
        prev_req: BlockId,
        prev_res: BlockId,
    ) -> Block {
        Block {
            up: 10,
            down: 5,
            total_up_requester: 10 * seq_req as u32,
            total_down_requester: 5 * seq_req as u32,
            sequence_number_requester: seq_req,
            previous_hash_requester: prev_req,
            total_up_responder: 5 * seq_res as u32,
            total_down_responder: 10 * seq_res as u32,
            sequence_number_responder: seq_res,
            previous_hash_responder: prev_res,
            public_key_requester: requester.clone(),
            signature_requester: test_signature(seq_req as u8),
            public_key_responder: responder.clone(),
            signature_responder: test_signature(seq_res as u8),
        }
    }

    /// Behavioral battery run against every backend.
    pub(crate) fn exercise_store<S: LedgerStore>(store: &mut S) {
        let alice = test_key(1);
        let bob = test_key(2);
        let carol = test_key(3);

        // Empty store sentinels.
        assert_eq!(store.latest_sequence_number(&alice).expect("latest"), -1);
        assert!(store.previous_id(&alice).expect("previous").is_none());
        assert!(store.totals(&alice).expect("totals").is_none());
        assert!(store.ids().expect("ids").is_empty());

        // Alice requests from Bob: both start their chains.
        let b1 = test_block(&alice, &bob, 1, 1, BlockId::GENESIS, BlockId::GENESIS);
        store.insert(&b1).expect("insert b1");

        // Re-inserting the same content is a duplicate.
        match store.insert(&b1) {
            Err(StoreError::DuplicateBlock) => {}
            other => panic!("expected DuplicateBlock, got {other:?}"),
        }

        assert!(store.contains(&b1.id()).expect("contains"));
        assert!(!store.contains(&BlockId([9u8; HASH_LEN])).expect("contains"));
        assert_eq!(store.get(&b1.id()).expect("get").as_ref(), Some(&b1));

        assert!(
            store
                .contains_signature(&b1.signature_requester, &alice)
                .expect("contains_signature")
        );
        assert!(
            !store
                .contains_signature(&b1.signature_requester, &bob)
                .expect("contains_signature")
        );

        // Bob requests from Alice: Alice's chain grows through the
        // responder side.
        let b2 = test_block(&bob, &alice, 2, 2, b1.id(), b1.id());
        store.insert(&b2).expect("insert b2");

        // Either-side lookups.
        assert_eq!(
            store.get_by_seq_and_pk(1, &alice).expect("get_by_seq").as_ref(),
            Some(&b1)
        );
        assert_eq!(
            store.get_by_seq_and_pk(2, &alice).expect("get_by_seq").as_ref(),
            Some(&b2)
        );
        assert!(store.get_by_seq_and_pk(3, &alice).expect("get_by_seq").is_none());
        assert!(store.get_by_seq_and_pk(1, &carol).expect("get_by_seq").is_none());

        // Latest sequence numbers span both sides.
        assert_eq!(store.latest_sequence_number(&alice).expect("latest"), 2);
        assert_eq!(store.latest_sequence_number(&bob).expect("latest"), 2);
        assert_eq!(store.latest_sequence_number(&carol).expect("latest"), -1);

        // previous_id points at the block with the max sequence number.
        assert_eq!(store.previous_id(&alice).expect("previous"), Some(b2.id()));

        // Totals come from the key's own side of its latest block.
        assert_eq!(
            store.totals(&alice).expect("totals"),
            Some((b2.total_up_responder, b2.total_down_responder))
        );
        assert_eq!(
            store.totals(&bob).expect("totals"),
            Some((b2.total_up_requester, b2.total_down_requester))
        );

        let mut ids = store.ids().expect("ids");
        ids.sort_by_key(|id| *id.as_bytes());
        let mut expected = vec![b1.id(), b2.id()];
        expected.sort_by_key(|id| *id.as_bytes());
        assert_eq!(ids, expected);
    }

    #[test]
    fn memory_store_passes_battery() {
        let mut store = MemoryStore::new();
        exercise_store(&mut store);
    }

    #[test]
    fn sqlite_store_passes_battery() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        exercise_store(&mut store);
    }
}
