//! In-memory block store.
//!
//! This implementation is useful for unit tests and in-process demos. It
//! keeps all blocks in a `HashMap` keyed by [`BlockId`] and answers the
//! per-key queries by scanning, which is fine at test scale.

use std::collections::HashMap;

use crate::store::{LedgerStore, Side, StoreError};
use crate::types::{Block, BlockId, PublicKey, Signature};

/// In-memory implementation of [`LedgerStore`].
#[derive(Default)]
pub struct MemoryStore {
    blocks: HashMap<BlockId, Block>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block in which `public_key` holds its greatest sequence
    /// number, together with the side it occupies.
    fn latest_for(&self, public_key: &PublicKey) -> Option<(&Block, Side)> {
        let mut best: Option<(&Block, Side)> = None;
        for block in self.blocks.values() {
            for side in [Side::Requester, Side::Responder] {
                let key = match side {
                    Side::Requester => &block.public_key_requester,
                    Side::Responder => &block.public_key_responder,
                };
                if key != public_key {
                    continue;
                }
                let seq = side.sequence_number(block);
                if best.is_none_or(|(b, s)| seq > s.sequence_number(b)) {
                    best = Some((block, side));
                }
            }
        }
        best
    }
}

impl LedgerStore for MemoryStore {
    fn insert(&mut self, block: &Block) -> Result<(), StoreError> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Err(StoreError::DuplicateBlock);
        }
        self.blocks.insert(id, block.clone());
        Ok(())
    }

    fn get(&self, id: &BlockId) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.get(id).cloned())
    }

    fn get_by_seq_and_pk(
        &self,
        sequence_number: i32,
        public_key: &PublicKey,
    ) -> Result<Option<Block>, StoreError> {
        let found = self.blocks.values().find(|block| {
            (block.public_key_requester == *public_key
                && block.sequence_number_requester == sequence_number)
                || (block.public_key_responder == *public_key
                    && block.sequence_number_responder == sequence_number)
        });
        Ok(found.cloned())
    }

    fn contains(&self, id: &BlockId) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(id))
    }

    fn contains_signature(
        &self,
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, StoreError> {
        Ok(self.blocks.values().any(|block| {
            block.public_key_requester == *public_key && block.signature_requester == *signature
        }))
    }

    fn latest_sequence_number(&self, public_key: &PublicKey) -> Result<i64, StoreError> {
        Ok(self
            .latest_for(public_key)
            .map(|(block, side)| i64::from(side.sequence_number(block)))
            .unwrap_or(-1))
    }

    fn previous_id(&self, public_key: &PublicKey) -> Result<Option<BlockId>, StoreError> {
        Ok(self.latest_for(public_key).map(|(block, _)| block.id()))
    }

    fn totals(&self, public_key: &PublicKey) -> Result<Option<(u32, u32)>, StoreError> {
        Ok(self
            .latest_for(public_key)
            .map(|(block, side)| side.totals(block)))
    }

    fn ids(&self) -> Result<Vec<BlockId>, StoreError> {
        Ok(self.blocks.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{test_block, test_key};

    #[test]
    fn len_tracks_inserts() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());

        let alice = test_key(1);
        let bob = test_key(2);
        let block = test_block(&alice, &bob, 1, 1, BlockId::GENESIS, BlockId::GENESIS);
        store.insert(&block).expect("insert");

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
