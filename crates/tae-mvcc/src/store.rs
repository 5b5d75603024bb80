use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tae_primitives::BlockId;

use crate::chain::BlockMvcc;

/// Owns one [`BlockMvcc`] per block that has ever been touched. Entries are
/// created lazily and never removed — a block's chains live as long as its
/// catalog entry, which owns it exclusively.
#[derive(Default)]
pub struct ChainStore {
    blocks: RwLock<HashMap<BlockId, Arc<BlockMvcc>>>,
}

impl ChainStore {
    pub fn new() -> Self {
        ChainStore::default()
    }

    pub fn get_or_create(&self, block: BlockId) -> Arc<BlockMvcc> {
        if let Some(existing) = self.blocks.read().get(&block) {
            return existing.clone();
        }
        self.blocks
            .write()
            .entry(block)
            .or_insert_with(|| Arc::new(BlockMvcc::new(block)))
            .clone()
    }

    pub fn get(&self, block: BlockId) -> Option<Arc<BlockMvcc>> {
        self.blocks.read().get(&block).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_primitives::ObjectId;

    #[test]
    fn get_or_create_returns_the_same_chain_on_repeat_calls() {
        let store = ChainStore::new();
        let block = BlockId::new(ObjectId::from_counter(1), 0);
        let a = store.get_or_create(block);
        let b = store.get_or_create(block);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_block_is_absent_until_created() {
        let store = ChainStore::new();
        let block = BlockId::new(ObjectId::from_counter(2), 0);
        assert!(store.get(block).is_none());
        store.get_or_create(block);
        assert!(store.get(block).is_some());
    }
}
