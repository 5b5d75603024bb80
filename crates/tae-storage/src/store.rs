use std::collections::HashMap;

use parking_lot::RwLock;
use tae_primitives::{Batch, BlockId, Value};

use crate::error::{Result, StorageError};

/// Pluggable object-storage backend: a column-batch-per-block shape this
/// engine persists on freeze.
pub trait ObjectStore: Send + Sync {
    /// Persists a frozen block's column batch and returns the approximate
    /// byte size written, for `ObjectStats::byte_size`.
    fn write_block(&self, block: BlockId, batch: Batch) -> Result<u64>;
    fn read_block(&self, block: BlockId) -> Result<Batch>;
}

/// In-memory object store standing in for shared object storage. The
/// on-disk object format is left to the embedder; this is a process-lifetime
/// map keyed by identity rather than content hash, since this engine's
/// objects are never deduplicated by content.
#[derive(Default)]
pub struct InMemoryObjectStore {
    blocks: RwLock<HashMap<BlockId, Batch>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn write_block(&self, block: BlockId, batch: Batch) -> Result<u64> {
        let byte_size = estimate_bytes(&batch);
        self.blocks.write().insert(block, batch);
        Ok(byte_size)
    }

    fn read_block(&self, block: BlockId) -> Result<Batch> {
        self.blocks
            .read()
            .get(&block)
            .cloned()
            .ok_or(StorageError::BlockNotFound(block))
    }
}

fn estimate_bytes(batch: &Batch) -> u64 {
    let mut total = 0u64;
    for col in &batch.columns {
        for v in col {
            total += match v {
                Value::Null => 1,
                Value::I64(_) => 8,
                Value::Bool(_) => 1,
                Value::Str(s) => s.len() as u64,
                Value::Bytes(b) => b.len() as u64,
            };
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_primitives::ObjectId;

    #[test]
    fn write_then_read_round_trips() {
        let store = InMemoryObjectStore::new();
        let block = BlockId::new(ObjectId::from_counter(1), 0);
        let batch = Batch {
            columns: vec![vec![Value::I64(1), Value::I64(2)]],
        };
        store.write_block(block, batch.clone()).unwrap();
        let read = store.read_block(block).unwrap();
        assert_eq!(read.columns, batch.columns);
    }

    #[test]
    fn unknown_block_is_not_found() {
        let store = InMemoryObjectStore::new();
        let block = BlockId::new(ObjectId::from_counter(2), 0);
        assert!(matches!(store.read_block(block), Err(StorageError::BlockNotFound(_))));
    }
}
