use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tae_catalog::ColumnZoneMap;
use tae_data_structures::DeleteBitmap;
use tae_mvcc::{AppendNode, BlockMvcc, ChainStore};
use tae_primitives::{Batch, BlockId, ObjectId, RowId, Schema, Timestamp, TxnId, Value};

use crate::bloom::BloomFilter;
use crate::error::{Result, StorageError};
use crate::store::ObjectStore;
use crate::zonemap::{build_zone_map, definitely_excludes};

/// Uniform scan/dedup contract shared by [`MemoryNode`] and [`PersistedNode`].
/// Callers drive it through [`NodeState`], which dispatches to whichever
/// variant is current without caring which one it is holding.
pub trait NodeT: Send + Sync {
    fn rows(&self) -> u32;

    /// Returns the first offending key's index, if any key in `keys`
    /// matches a visible, non-deleted row.
    fn contains(&self, keys: &[Value], txn: TxnId, reader_ts: Timestamp, is_committing: bool) -> Result<()>;

    /// Every visible, non-deleted row whose primary key matches any of
    /// `keys`, appended to `out`.
    fn get_duplicated_rows(
        &self,
        txn: TxnId,
        reader_ts: Timestamp,
        max_visible_row: u32,
        keys: &[Value],
        out: &mut Vec<RowId>,
        is_committing: bool,
    );

    fn get_row_by_filter(&self, reader_ts: Timestamp, txn: Option<TxnId>, pk_value: &Value) -> Option<RowId>;

    /// Fetches one row by its exact `(block_offset, row_offset)` address, if
    /// it is visible at `(reader_ts, txn)`. Returns the whole row so the
    /// caller can then index the requested column.
    fn get_row(&self, block_offset: u16, row_offset: u32, reader_ts: Timestamp, txn: Option<TxnId>) -> Option<tae_primitives::Row>;

    /// Materializes the requested columns for every row visible at
    /// `(reader_ts, txn)`, independent of any delete mask — callers combine
    /// this with `fill_block_tombstones` to apply tombstones on top.
    fn scan(&self, reader_ts: Timestamp, txn: Option<TxnId>, col_idxes: &[usize]) -> Batch;
}

fn pk_index(schema: &Schema) -> Result<usize> {
    schema.pk_index().ok_or(StorageError::NoPrimaryKey)
}

struct MemoryBlock {
    chain: Arc<BlockMvcc>,
    data: RwLock<Batch>,
}

/// The appendable, in-memory variant of an object's data. Holds one mutable
/// column batch per block plus that block's MVCC chain.
pub struct MemoryNode {
    object: ObjectId,
    schema: Schema,
    chain_store: Arc<ChainStore>,
    blocks: RwLock<Vec<MemoryBlock>>,
}

impl MemoryNode {
    pub fn new(object: ObjectId, schema: Schema, chain_store: Arc<ChainStore>) -> Self {
        MemoryNode {
            object,
            schema,
            chain_store,
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn chain_for(&self, block_offset: u16) -> Option<Arc<BlockMvcc>> {
        self.blocks.read().get(block_offset as usize).map(|b| b.chain.clone())
    }

    /// Appends as much of `rows` as fits into this object, opening a new
    /// block whenever the current tail block would exceed `block_max_rows`.
    /// Returns the row IDs assigned (in the same order as the consumed
    /// input rows), whether the object just reached `max_blocks` full and
    /// must be frozen by the caller, and any rows that didn't fit once the
    /// object hit `max_blocks` — the caller must freeze this object and
    /// stage the returned remainder into a fresh one; it is never dropped.
    pub fn append(
        &self,
        mut rows: Batch,
        prepare_ts: Timestamp,
        txn: TxnId,
        block_max_rows: u32,
        max_blocks: u16,
    ) -> (Vec<RowId>, bool, Batch) {
        let mut row_ids = Vec::with_capacity(rows.num_rows());
        let mut blocks = self.blocks.write();
        loop {
            if rows.is_empty() {
                break;
            }
            if blocks.is_empty() {
                self.open_block(&mut blocks);
            }
            let tail_idx = blocks.len() - 1;
            let capacity = block_max_rows.saturating_sub(blocks[tail_idx].data.read().num_rows() as u32);
            if capacity == 0 {
                if blocks.len() as u16 >= max_blocks {
                    // Object is full. Stop here and hand the remainder back
                    // to the caller, which must freeze this object and open
                    // a fresh one to absorb it.
                    break;
                }
                self.open_block(&mut blocks);
                continue;
            }
            let take = (capacity as usize).min(rows.num_rows());
            let (head, tail) = split_batch(rows, take);
            rows = tail;
            let block = &blocks[tail_idx];
            let start_row = block.data.read().num_rows() as u32;
            let max_row = start_row + take as u32;
            let node = Arc::new(AppendNode::new(block.chain.block, start_row, max_row, prepare_ts, false, Some(txn)));
            block.chain.push_append(node).expect("start_row computed from current tail length");
            {
                let mut data = block.data.write();
                if data.columns.is_empty() {
                    data.columns = (0..head.num_cols()).map(|_| Vec::new()).collect();
                }
                for (col_idx, col) in head.columns.into_iter().enumerate() {
                    data.columns[col_idx].extend(col);
                }
            }
            for r in start_row..max_row {
                row_ids.push(RowId::new(block.chain.block, r));
            }
        }
        let needs_freeze = blocks.len() as u16 >= max_blocks
            && blocks
                .last()
                .map(|b| b.data.read().num_rows() as u32 >= block_max_rows)
                .unwrap_or(false);
        (row_ids, needs_freeze, rows)
    }

    fn open_block(&self, blocks: &mut Vec<MemoryBlock>) {
        let offset = blocks.len() as u16;
        let block_id = BlockId::new(self.object, offset);
        blocks.push(MemoryBlock {
            chain: self.chain_store.get_or_create(block_id),
            data: RwLock::new(Batch::default()),
        });
    }

    /// Slices the column values landing at `[start_row, max_row)` of
    /// `block_offset`, for embedding in the `Append` WAL command so replay
    /// can rebuild this range without a separate raw data log.
    pub fn rows_in_range(&self, block_offset: u16, start_row: u32, max_row: u32) -> Batch {
        let blocks = self.blocks.read();
        let Some(block) = blocks.get(block_offset as usize) else {
            return Batch::default();
        };
        let data = block.data.read();
        let (start, end) = (start_row as usize, max_row as usize);
        Batch {
            columns: data.columns.iter().map(|c| c[start.min(c.len())..end.min(c.len())].to_vec()).collect(),
        }
    }

    /// Materializes an append range recorded in a prior run's WAL, rebuilding
    /// both the block's MVCC chain and its row data without restaging
    /// through a live transaction. Idempotent via `BlockMvcc::replay_append`:
    /// a range already present at `start_row` is a no-op, so a re-delivered
    /// WAL entry never double-appends data.
    pub fn replay_append(&self, block_offset: u16, rows: Batch, start_row: u32, max_row: u32, commit_ts: Timestamp, is_tombstone: bool) -> Result<bool> {
        let mut blocks = self.blocks.write();
        while blocks.len() <= block_offset as usize {
            self.open_block(&mut blocks);
        }
        let block = &blocks[block_offset as usize];
        let node = Arc::new(AppendNode::new_committed(block.chain.block, start_row, max_row, commit_ts, is_tombstone));
        if !block.chain.replay_append(node)? {
            return Ok(false);
        }
        let mut data = block.data.write();
        if data.columns.is_empty() {
            data.columns = (0..rows.num_cols()).map(|_| Vec::new()).collect();
        }
        for (col_idx, col) in rows.columns.into_iter().enumerate() {
            data.columns[col_idx].extend(col);
        }
        Ok(true)
    }

    /// Snapshots every block's batch for flush-to-storage on freeze.
    pub fn snapshot_blocks(&self) -> Vec<(u16, Batch, Arc<BlockMvcc>)> {
        self.blocks
            .read()
            .iter()
            .enumerate()
            .map(|(i, b)| (i as u16, b.data.read().clone(), b.chain.clone()))
            .collect()
    }
}

fn split_batch(mut batch: Batch, at: usize) -> (Batch, Batch) {
    let mut head_cols = Vec::with_capacity(batch.columns.len());
    let mut tail_cols = Vec::with_capacity(batch.columns.len());
    for col in batch.columns.drain(..) {
        let mut col = col;
        let tail = col.split_off(at);
        head_cols.push(col);
        tail_cols.push(tail);
    }
    (Batch { columns: head_cols }, Batch { columns: tail_cols })
}

impl NodeT for MemoryNode {
    fn rows(&self) -> u32 {
        self.blocks.read().iter().map(|b| b.data.read().num_rows() as u32).sum()
    }

    fn contains(&self, keys: &[Value], txn: TxnId, reader_ts: Timestamp, is_committing: bool) -> Result<()> {
        let pk = pk_index(&self.schema)?;
        let effective_ts = if is_committing { Timestamp::MAX } else { reader_ts };
        for block in self.blocks.read().iter() {
            let data = block.data.read();
            if data.columns.len() <= pk {
                continue;
            }
            for (ro, v) in data.columns[pk].iter().enumerate() {
                let ro = ro as u32;
                if !block.chain.is_row_visible(ro, effective_ts, Some(txn)) || block.chain.is_deleted(effective_ts, Some(txn), ro) {
                    continue;
                }
                if let Some(idx) = keys.iter().position(|k| k == v) {
                    return Err(StorageError::Duplicate(idx));
                }
            }
        }
        Ok(())
    }

    fn get_duplicated_rows(
        &self,
        txn: TxnId,
        reader_ts: Timestamp,
        max_visible_row: u32,
        keys: &[Value],
        out: &mut Vec<RowId>,
        is_committing: bool,
    ) {
        let Ok(pk) = pk_index(&self.schema) else { return };
        let effective_ts = if is_committing { Timestamp::MAX } else { reader_ts };
        for block in self.blocks.read().iter() {
            let data = block.data.read();
            if data.columns.len() <= pk {
                continue;
            }
            for (ro, v) in data.columns[pk].iter().enumerate() {
                let ro = ro as u32;
                if ro >= max_visible_row {
                    break;
                }
                if !block.chain.is_row_visible(ro, effective_ts, Some(txn)) || block.chain.is_deleted(effective_ts, Some(txn), ro) {
                    continue;
                }
                if keys.iter().any(|k| k == v) {
                    out.push(RowId::new(block.chain.block, ro));
                }
            }
        }
    }

    fn get_row_by_filter(&self, reader_ts: Timestamp, txn: Option<TxnId>, pk_value: &Value) -> Option<RowId> {
        let pk = self.schema.pk_index()?;
        for block in self.blocks.read().iter() {
            let data = block.data.read();
            if data.columns.len() <= pk {
                continue;
            }
            for (ro, v) in data.columns[pk].iter().enumerate() {
                let ro = ro as u32;
                if v == pk_value && block.chain.is_row_visible(ro, reader_ts, txn) {
                    return Some(RowId::new(block.chain.block, ro));
                }
            }
        }
        None
    }

    fn scan(&self, reader_ts: Timestamp, txn: Option<TxnId>, col_idxes: &[usize]) -> Batch {
        let mut out = Batch {
            columns: col_idxes.iter().map(|_| Vec::new()).collect(),
        };
        for block in self.blocks.read().iter() {
            let data = block.data.read();
            let rows = data.num_rows() as u32;
            for ro in 0..rows {
                if block.chain.is_row_visible(ro, reader_ts, txn) {
                    for (oi, &ci) in col_idxes.iter().enumerate() {
                        out.columns[oi].push(data.columns[ci][ro as usize].clone());
                    }
                }
            }
        }
        out
    }

    fn get_row(&self, block_offset: u16, row_offset: u32, reader_ts: Timestamp, txn: Option<TxnId>) -> Option<tae_primitives::Row> {
        let blocks = self.blocks.read();
        let block = blocks.get(block_offset as usize)?;
        if !block.chain.is_row_visible(row_offset, reader_ts, txn) {
            return None;
        }
        let data = block.data.read();
        if row_offset as usize >= data.num_rows() {
            return None;
        }
        Some(data.row(row_offset as usize))
    }
}

struct PersistedBlock {
    row_count: u32,
    pk_zone_map: ColumnZoneMap,
    bloom: BloomFilter,
    /// Present only for an appendable persisted object mid-tombstone-
    /// collection; `None` for an ordinary frozen non-appendable object.
    chain: Option<Arc<BlockMvcc>>,
}

/// The immutable, object-storage-backed variant: backed by object storage
/// with a zone-map and bloom-filter index per block.
pub struct PersistedNode {
    object: ObjectId,
    schema: Schema,
    store: Arc<dyn ObjectStore>,
    blocks: Vec<PersistedBlock>,
}

impl PersistedNode {
    /// Freezes a [`MemoryNode`]'s current contents: writes every block to
    /// `store`, builds its zone-map and bloom filter over the primary-key
    /// column, and (for appendable persisted objects only, e.g. during
    /// tombstone collection) retains the block's MVCC chain for the
    /// `maxVisibleRow`/commit-TS gate in step 4 of `GetDuplicatedRows`.
    pub fn freeze(memory: &MemoryNode, store: Arc<dyn ObjectStore>, keep_chains: bool) -> Result<Self> {
        let pk = pk_index(&memory.schema)?;
        let mut blocks = Vec::new();
        for (offset, batch, chain) in memory.snapshot_blocks() {
            let pk_values = batch.columns.get(pk).cloned().unwrap_or_default();
            let pk_zone_map = build_zone_map(&pk_values);
            let bloom = BloomFilter::build(pk_values.iter());
            let row_count = batch.num_rows() as u32;
            store.write_block(BlockId::new(memory.object, offset), batch)?;
            blocks.push(PersistedBlock {
                row_count,
                pk_zone_map,
                bloom,
                chain: if keep_chains { Some(chain) } else { None },
            });
        }
        Ok(PersistedNode {
            object: memory.object,
            schema: memory.schema.clone(),
            store,
            blocks,
        })
    }

    /// Rebuilds a persisted node purely from its durable blocks, for an
    /// object whose rows were written straight to object storage by a prior
    /// run rather than staged through a [`MemoryNode`] first — the merge
    /// scheduler's output, replayed without a matching `Append` WAL record
    /// to rebuild from. Blocks are probed sequentially
    /// until the store reports one missing; it never keeps a chain, since
    /// an object written this way is never appendable-for-tombstones.
    pub fn reload(object: ObjectId, schema: Schema, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let pk = pk_index(&schema)?;
        let mut blocks = Vec::new();
        loop {
            let offset = blocks.len() as u16;
            let batch = match store.read_block(BlockId::new(object, offset)) {
                Ok(batch) => batch,
                Err(StorageError::BlockNotFound(_)) => break,
                Err(e) => return Err(e),
            };
            let pk_values = batch.columns.get(pk).cloned().unwrap_or_default();
            blocks.push(PersistedBlock {
                row_count: batch.num_rows() as u32,
                pk_zone_map: build_zone_map(&pk_values),
                bloom: BloomFilter::build(pk_values.iter()),
                chain: None,
            });
        }
        Ok(PersistedNode { object, schema, store, blocks })
    }

    fn load_pk_column(&self, block_offset: u16) -> Result<Vec<Value>> {
        let pk = pk_index(&self.schema)?;
        let batch = self.store.read_block(BlockId::new(self.object, block_offset))?;
        Ok(batch.columns.get(pk).cloned().unwrap_or_default())
    }

    /// Zone-map and bloom-filter pruned candidate search, shared by
    /// `contains` (which stops at the first match) and `get_duplicated_rows`
    /// (which collects every match).
    fn candidates_for(&self, keys: &[Value], max_visible_row: u32, reader_ts: Timestamp, txn: TxnId, is_committing: bool) -> Vec<(u16, u32, usize)> {
        let effective_ts = if is_committing { Timestamp::MAX } else { reader_ts };
        let mut matches = Vec::new();
        for (offset, block) in self.blocks.iter().enumerate() {
            let offset = offset as u16;
            let surviving_keys: Vec<(usize, &Value)> = keys
                .iter()
                .enumerate()
                .filter(|(_, k)| !definitely_excludes(&block.pk_zone_map, k))
                .collect();
            if surviving_keys.is_empty() {
                continue;
            }
            let surviving_keys: Vec<(usize, &Value)> = surviving_keys
                .into_iter()
                .filter(|(_, k)| block.bloom.maybe_contains(k))
                .collect();
            if surviving_keys.is_empty() {
                continue;
            }
            let Ok(pk_col) = self.load_pk_column(offset) else { continue };
            for (ro, v) in pk_col.iter().enumerate() {
                let ro = ro as u32;
                if let Some(chain) = &block.chain {
                    if ro >= max_visible_row || !chain.is_row_visible(ro, effective_ts, Some(txn)) {
                        continue;
                    }
                }
                for &(key_idx, k) in &surviving_keys {
                    if k.total_cmp(v) == Ordering::Equal {
                        matches.push((offset, ro, key_idx));
                    }
                }
            }
        }
        matches
    }
}

impl NodeT for PersistedNode {
    fn rows(&self) -> u32 {
        self.blocks.iter().map(|b| b.row_count).sum()
    }

    fn contains(&self, keys: &[Value], txn: TxnId, reader_ts: Timestamp, is_committing: bool) -> Result<()> {
        let max_visible_row = u32::MAX;
        match self.candidates_for(keys, max_visible_row, reader_ts, txn, is_committing).first() {
            Some((_, _, key_idx)) => Err(StorageError::Duplicate(*key_idx)),
            None => Ok(()),
        }
    }

    fn get_duplicated_rows(
        &self,
        txn: TxnId,
        reader_ts: Timestamp,
        max_visible_row: u32,
        keys: &[Value],
        out: &mut Vec<RowId>,
        is_committing: bool,
    ) {
        for (offset, ro, _) in self.candidates_for(keys, max_visible_row, reader_ts, txn, is_committing) {
            out.push(RowId::new(BlockId::new(self.object, offset), ro));
        }
    }

    fn get_row_by_filter(&self, reader_ts: Timestamp, txn: Option<TxnId>, pk_value: &Value) -> Option<RowId> {
        for (offset, block) in self.blocks.iter().enumerate() {
            let offset = offset as u16;
            if definitely_excludes(&block.pk_zone_map, pk_value) || !block.bloom.maybe_contains(pk_value) {
                continue;
            }
            let Ok(pk_col) = self.load_pk_column(offset) else { continue };
            for (ro, v) in pk_col.iter().enumerate() {
                let ro = ro as u32;
                if v == pk_value {
                    if let Some(chain) = &block.chain {
                        if !chain.is_row_visible(ro, reader_ts, txn) {
                            continue;
                        }
                    }
                    return Some(RowId::new(BlockId::new(self.object, offset), ro));
                }
            }
        }
        None
    }

    fn scan(&self, reader_ts: Timestamp, txn: Option<TxnId>, col_idxes: &[usize]) -> Batch {
        let mut out = Batch {
            columns: col_idxes.iter().map(|_| Vec::new()).collect(),
        };
        for (offset, block) in self.blocks.iter().enumerate() {
            let offset = offset as u16;
            let Ok(batch) = self.store.read_block(BlockId::new(self.object, offset)) else { continue };
            for ro in 0..block.row_count {
                if let Some(chain) = &block.chain {
                    if !chain.is_row_visible(ro, reader_ts, txn) {
                        continue;
                    }
                }
                for (oi, &ci) in col_idxes.iter().enumerate() {
                    out.columns[oi].push(batch.columns[ci][ro as usize].clone());
                }
            }
        }
        out
    }

    fn get_row(&self, block_offset: u16, row_offset: u32, reader_ts: Timestamp, txn: Option<TxnId>) -> Option<tae_primitives::Row> {
        let block = self.blocks.get(block_offset as usize)?;
        if row_offset >= block.row_count {
            return None;
        }
        if let Some(chain) = &block.chain {
            if !chain.is_row_visible(row_offset, reader_ts, txn) {
                return None;
            }
        }
        let batch = self.store.read_block(BlockId::new(self.object, block_offset)).ok()?;
        Some(batch.row(row_offset as usize))
    }
}

/// Fills `deletes` with every row offset of `target_block` recorded by a
/// tombstone object's delete bitmap. Tombstone objects hold their delete
/// records directly as `DeleteNode`s on
/// the MVCC chain of the block that *created* the deletion; fan-in across
/// objects is done by the caller (`tae-txn`/`tae`), which knows which
/// tombstone chains target a given data block.
pub fn fill_block_tombstones(chain: &BlockMvcc, reader_ts: Timestamp, txn: Option<TxnId>, max_row: u32, deletes: &mut DeleteBitmap) {
    for ro in 0..max_row {
        if chain.is_deleted(reader_ts, txn, ro) {
            deletes.set(ro);
        }
    }
}

/// Dynamic dispatch across node variants, modeled as a tagged sum behind a
/// uniform scan/dedup trait rather than a trait object.
#[derive(Clone)]
pub enum NodeState {
    Memory(Arc<MemoryNode>),
    Persisted(Arc<PersistedNode>),
}

impl NodeT for NodeState {
    fn rows(&self) -> u32 {
        match self {
            NodeState::Memory(n) => n.rows(),
            NodeState::Persisted(n) => n.rows(),
        }
    }

    fn contains(&self, keys: &[Value], txn: TxnId, reader_ts: Timestamp, is_committing: bool) -> Result<()> {
        match self {
            NodeState::Memory(n) => n.contains(keys, txn, reader_ts, is_committing),
            NodeState::Persisted(n) => n.contains(keys, txn, reader_ts, is_committing),
        }
    }

    fn get_duplicated_rows(
        &self,
        txn: TxnId,
        reader_ts: Timestamp,
        max_visible_row: u32,
        keys: &[Value],
        out: &mut Vec<RowId>,
        is_committing: bool,
    ) {
        match self {
            NodeState::Memory(n) => n.get_duplicated_rows(txn, reader_ts, max_visible_row, keys, out, is_committing),
            NodeState::Persisted(n) => n.get_duplicated_rows(txn, reader_ts, max_visible_row, keys, out, is_committing),
        }
    }

    fn get_row_by_filter(&self, reader_ts: Timestamp, txn: Option<TxnId>, pk_value: &Value) -> Option<RowId> {
        match self {
            NodeState::Memory(n) => n.get_row_by_filter(reader_ts, txn, pk_value),
            NodeState::Persisted(n) => n.get_row_by_filter(reader_ts, txn, pk_value),
        }
    }

    fn scan(&self, reader_ts: Timestamp, txn: Option<TxnId>, col_idxes: &[usize]) -> Batch {
        match self {
            NodeState::Memory(n) => n.scan(reader_ts, txn, col_idxes),
            NodeState::Persisted(n) => n.scan(reader_ts, txn, col_idxes),
        }
    }

    fn get_row(&self, block_offset: u16, row_offset: u32, reader_ts: Timestamp, txn: Option<TxnId>) -> Option<tae_primitives::Row> {
        match self {
            NodeState::Memory(n) => n.get_row(block_offset, row_offset, reader_ts, txn),
            NodeState::Persisted(n) => n.get_row(block_offset, row_offset, reader_ts, txn),
        }
    }
}

/// Holds the current variant behind a lock; readers clone the `Arc` they
/// need and release the lock immediately, so an in-flight reader keeps a
/// consistent view even after a concurrent freeze swaps the variant —
/// readers already holding a shared reference to the memory variant
/// continue to see consistent data until they drop it.
pub struct ObjectDataNode {
    state: RwLock<NodeState>,
}

impl ObjectDataNode {
    pub fn new_memory(node: Arc<MemoryNode>) -> Self {
        ObjectDataNode {
            state: RwLock::new(NodeState::Memory(node)),
        }
    }

    /// For objects born already persisted, e.g. a merge scheduler's
    /// compaction output, which never has a memory phase.
    pub fn new_persisted(node: Arc<PersistedNode>) -> Self {
        ObjectDataNode {
            state: RwLock::new(NodeState::Persisted(node)),
        }
    }

    pub fn current(&self) -> NodeState {
        self.state.read().clone()
    }

    pub fn swap_to_persisted(&self, persisted: Arc<PersistedNode>) {
        *self.state.write() = NodeState::Persisted(persisted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_primitives::{ColumnSchema, Schema};

    fn schema() -> Schema {
        Schema::new(vec![ColumnSchema::new("id").pk(), ColumnSchema::new("v")])
    }

    fn batch(rows: &[(i64, i64)]) -> Batch {
        Batch {
            columns: vec![
                rows.iter().map(|(k, _)| Value::I64(*k)).collect(),
                rows.iter().map(|(_, v)| Value::I64(*v)).collect(),
            ],
        }
    }

    #[test]
    fn memory_node_append_assigns_contiguous_row_ids() {
        let node = MemoryNode::new(ObjectId::from_counter(1), schema(), Arc::new(ChainStore::new()));
        let (ids, needs_freeze, leftover) = node.append(batch(&[(1, 10), (2, 20), (3, 30)]), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        assert_eq!(ids.len(), 3);
        assert!(!needs_freeze);
        assert!(leftover.is_empty());
        assert_eq!(node.rows(), 3);
    }

    #[test]
    fn memory_node_opens_a_new_block_past_capacity() {
        let node = MemoryNode::new(ObjectId::from_counter(1), schema(), Arc::new(ChainStore::new()));
        let rows: Vec<(i64, i64)> = (0..5).map(|i| (i, i * 10)).collect();
        node.append(batch(&rows), Timestamp::new(1, 0), TxnId(1), 3, 256);
        assert_eq!(node.block_count(), 2);
    }

    #[test]
    fn append_past_object_max_blocks_returns_leftover_instead_of_dropping_rows() {
        let node = MemoryNode::new(ObjectId::from_counter(1), schema(), Arc::new(ChainStore::new()));
        let rows: Vec<(i64, i64)> = (0..12).map(|i| (i, i * 10)).collect();
        let (ids, needs_freeze, leftover) = node.append(batch(&rows), Timestamp::new(1, 0), TxnId(1), 4, 2);
        assert_eq!(ids.len(), 8);
        assert!(needs_freeze);
        assert_eq!(leftover.num_rows(), 4);
        assert_eq!(node.rows(), 8);
    }

    #[test]
    fn contains_reports_duplicate_for_visible_committed_key() {
        let chain_store = Arc::new(ChainStore::new());
        let node = MemoryNode::new(ObjectId::from_counter(1), schema(), chain_store);
        node.append(batch(&[(1, 10), (2, 20)]), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        // Commit the append.
        for (_, b, chain) in node.snapshot_blocks() {
            let _ = b;
            chain.commit_appends_in_range(0, 2, Timestamp::new(5, 0), &());
        }
        let err = node.contains(&[Value::I64(2)], TxnId(2), Timestamp::new(10, 0), false).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(0)));
    }

    #[test]
    fn contains_ignores_uncommitted_rows_from_other_txns() {
        let node = MemoryNode::new(ObjectId::from_counter(1), schema(), Arc::new(ChainStore::new()));
        node.append(batch(&[(1, 10)]), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        assert!(node.contains(&[Value::I64(1)], TxnId(2), Timestamp::new(10, 0), false).is_ok());
    }

    #[test]
    fn freeze_preserves_row_count_and_dedup_behavior() {
        let chain_store = Arc::new(ChainStore::new());
        let node = MemoryNode::new(ObjectId::from_counter(2), schema(), chain_store);
        node.append(batch(&[(100, 1), (200, 2)]), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        for (_, _, chain) in node.snapshot_blocks() {
            chain.commit_appends_in_range(0, 2, Timestamp::new(5, 0), &());
        }
        let store: Arc<dyn ObjectStore> = Arc::new(crate::store::InMemoryObjectStore::new());
        let persisted = PersistedNode::freeze(&node, store, false).unwrap();
        assert_eq!(persisted.rows(), 2);
        let err = persisted.contains(&[Value::I64(100)], TxnId(9), Timestamp::new(10, 0), false).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(0)));
        assert!(persisted.contains(&[Value::I64(999)], TxnId(9), Timestamp::new(10, 0), false).is_ok());
    }

    #[test]
    fn zone_map_and_bloom_prune_before_loading_columns() {
        let chain_store = Arc::new(ChainStore::new());
        let node = MemoryNode::new(ObjectId::from_counter(3), schema(), chain_store);
        let rows: Vec<(i64, i64)> = (1000..=2000).map(|k| (k, k)).collect();
        node.append(batch(&rows), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        for (_, _, chain) in node.snapshot_blocks() {
            chain.commit_appends_in_range(0, rows.len() as u32, Timestamp::new(5, 0), &());
        }
        let store: Arc<dyn ObjectStore> = Arc::new(crate::store::InMemoryObjectStore::new());
        let persisted = PersistedNode::freeze(&node, store, false).unwrap();
        let mut out = Vec::new();
        persisted.get_duplicated_rows(TxnId(9), Timestamp::new(10, 0), u32::MAX, &[Value::I64(50), Value::I64(1500)], &mut out, false);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn object_data_node_swap_keeps_old_reader_consistent() {
        let chain_store = Arc::new(ChainStore::new());
        let node = Arc::new(MemoryNode::new(ObjectId::from_counter(4), schema(), chain_store));
        node.append(batch(&[(1, 1)]), Timestamp::new(1, 0), TxnId(1), 8192, 256);
        let data_node = ObjectDataNode::new_memory(node.clone());
        let reader_view = data_node.current();
        let store: Arc<dyn ObjectStore> = Arc::new(crate::store::InMemoryObjectStore::new());
        let persisted = Arc::new(PersistedNode::freeze(&node, store, false).unwrap());
        data_node.swap_to_persisted(persisted);
        // The handle taken before the swap still reports the memory variant's state.
        assert!(matches!(reader_view, NodeState::Memory(_)));
        assert!(matches!(data_node.current(), NodeState::Persisted(_)));
    }
}
