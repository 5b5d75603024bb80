use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tae_mvcc::ChainStore;
use tae_primitives::{Batch, CancelToken, ObjectId, RowId, Schema, Timestamp, TxnId, Value};

use crate::error::Result;
use crate::node::{MemoryNode, NodeState, NodeT, ObjectDataNode, PersistedNode};
use crate::store::ObjectStore;

/// Every live data object of one table, plus which one currently accepts
/// appends — at most one appendable object per table at a time. The catalog
/// owns the authoritative `ObjectEntry` list; this is the storage-layer
/// counterpart that `tae-txn` drives directly, keyed by the same
/// `ObjectId`s so the two never drift apart.
pub struct TableStore {
    schema: Schema,
    chain_store: Arc<ChainStore>,
    objects: RwLock<HashMap<ObjectId, Arc<ObjectDataNode>>>,
    order: RwLock<Vec<ObjectId>>,
    appendable: RwLock<Option<ObjectId>>,
}

impl TableStore {
    pub fn new(schema: Schema, chain_store: Arc<ChainStore>) -> Self {
        TableStore {
            schema,
            chain_store,
            objects: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            appendable: RwLock::new(None),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<ObjectDataNode>> {
        self.objects.read().get(&id).cloned()
    }

    /// The object currently accepting appends, if one has been opened.
    pub fn current_appendable(&self) -> Option<(ObjectId, Arc<ObjectDataNode>)> {
        let id = (*self.appendable.read())?;
        self.object(id).map(|n| (id, n))
    }

    /// Registers a brand-new appendable object under `id` (minted by the
    /// caller so it can be registered in the catalog under the same id once
    /// the owning transaction's prepare-TS is known). Becomes the table's
    /// current appendable object.
    pub fn open_appendable(&self, id: ObjectId) -> Arc<ObjectDataNode> {
        let memory = Arc::new(MemoryNode::new(id, self.schema.clone(), self.chain_store.clone()));
        let node = Arc::new(ObjectDataNode::new_memory(memory));
        self.objects.write().insert(id, node.clone());
        self.order.write().push(id);
        *self.appendable.write() = Some(id);
        node
    }

    /// Registers an object that is already persisted (e.g. a merge
    /// scheduler's compaction output), without ever going through a memory
    /// phase.
    pub fn register_persisted(&self, id: ObjectId, node: Arc<PersistedNode>) {
        self.objects.write().insert(id, Arc::new(ObjectDataNode::new_persisted(node)));
        self.order.write().push(id);
    }

    /// Drops an object out of scan/dedup consideration once the catalog has
    /// recorded it as soft-deleted. A merge's input objects must stop
    /// contributing rows the instant the merge commits, or their rows would
    /// be double-counted against the new merged object.
    pub fn retire(&self, id: ObjectId) {
        self.objects.write().remove(&id);
        self.order.write().retain(|o| *o != id);
    }

    /// Freezes the current appendable object in place: builds a
    /// [`PersistedNode`] over its contents and atomically swaps the node's
    /// state — no reader ever observes a half-swapped object. `keep_chains`
    /// preserves per-block visibility gating for objects that remain
    /// appendable-for-tombstones afterward.
    pub fn freeze_current(&self, store: Arc<dyn ObjectStore>, keep_chains: bool) -> Result<Option<ObjectId>> {
        let Some(id) = *self.appendable.read() else {
            return Ok(None);
        };
        let node = self.objects.read().get(&id).cloned();
        let Some(node) = node else { return Ok(None) };
        let NodeState::Memory(memory) = node.current() else {
            return Ok(None);
        };
        let persisted = Arc::new(PersistedNode::freeze(&memory, store, keep_chains)?);
        node.swap_to_persisted(persisted);
        *self.appendable.write() = None;
        Ok(Some(id))
    }

    /// Re-checks every live object for a primary-key collision, in catalog
    /// insertion order so results are deterministic.
    pub fn contains_dedup(&self, keys: &[Value], txn: TxnId, reader_ts: Timestamp, is_committing: bool) -> Result<()> {
        let order = self.order.read().clone();
        let objects = self.objects.read();
        for id in order {
            if let Some(node) = objects.get(&id) {
                node.current().contains(keys, txn, reader_ts, is_committing)?;
            }
        }
        Ok(())
    }

    pub fn get_duplicated_rows(&self, txn: TxnId, reader_ts: Timestamp, keys: &[Value], out: &mut Vec<RowId>, is_committing: bool) {
        let order = self.order.read().clone();
        let objects = self.objects.read();
        for id in order {
            if let Some(node) = objects.get(&id) {
                node.current().get_duplicated_rows(txn, reader_ts, u32::MAX, keys, out, is_committing);
            }
        }
    }

    pub fn get_row_by_filter(&self, reader_ts: Timestamp, txn: Option<TxnId>, pk_value: &Value) -> Option<RowId> {
        let order = self.order.read().clone();
        let objects = self.objects.read();
        for id in order {
            if let Some(node) = objects.get(&id) {
                if let Some(row) = node.current().get_row_by_filter(reader_ts, txn, pk_value) {
                    return Some(row);
                }
            }
        }
        None
    }

    /// Scans every live object in catalog insertion order. Each object's
    /// data may live on object storage (`PersistedNode`), so this loop is a
    /// suspension point; `cancel` is checked before every object so a token
    /// that fires mid-scan surfaces as `Cancelled` rather than a truncated
    /// or silently-complete batch.
    pub fn scan(&self, reader_ts: Timestamp, txn: Option<TxnId>, col_idxes: &[usize], cancel: &CancelToken) -> Result<Batch> {
        let mut out = Batch {
            columns: col_idxes.iter().map(|_| Vec::new()).collect(),
        };
        let order = self.order.read().clone();
        let objects = self.objects.read();
        for id in order {
            cancel.check()?;
            if let Some(node) = objects.get(&id) {
                let partial = node.current().scan(reader_ts, txn, col_idxes);
                for (oi, col) in out.columns.iter_mut().enumerate() {
                    col.extend(partial.columns[oi].iter().cloned());
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use tae_primitives::{ColumnSchema, TxnId};

    fn schema() -> Schema {
        Schema::new(vec![ColumnSchema::new("id").pk(), ColumnSchema::new("v")])
    }

    #[test]
    fn open_appendable_becomes_current() {
        let store = TableStore::new(schema(), Arc::new(ChainStore::new()));
        let id = ObjectId::from_counter(1);
        store.open_appendable(id);
        let (current_id, _) = store.current_appendable().unwrap();
        assert_eq!(current_id, id);
    }

    #[test]
    fn freeze_current_clears_appendable_slot() {
        let store = TableStore::new(schema(), Arc::new(ChainStore::new()));
        let id = ObjectId::from_counter(1);
        let node = store.open_appendable(id);
        if let NodeState::Memory(m) = node.current() {
            m.append(
                Batch {
                    columns: vec![vec![Value::I64(1)], vec![Value::I64(2)]],
                },
                Timestamp::new(1, 0),
                TxnId(1),
                8192,
                256,
            );
        }
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let frozen = store.freeze_current(object_store, false).unwrap();
        assert_eq!(frozen, Some(id));
        assert!(store.current_appendable().is_none());
    }

    #[test]
    fn dedup_sees_committed_rows_across_objects() {
        let chain_store = Arc::new(ChainStore::new());
        let store = TableStore::new(schema(), chain_store);
        let id = ObjectId::from_counter(1);
        let node = store.open_appendable(id);
        if let NodeState::Memory(m) = node.current() {
            m.append(
                Batch {
                    columns: vec![vec![Value::I64(7)], vec![Value::I64(70)]],
                },
                Timestamp::new(1, 0),
                TxnId(1),
                8192,
                256,
            );
            for (_, _, chain) in m.snapshot_blocks() {
                chain.commit_appends_in_range(0, 1, Timestamp::new(5, 0), &());
            }
        }
        let err = store.contains_dedup(&[Value::I64(7)], TxnId(2), Timestamp::new(10, 0), false).unwrap_err();
        assert!(matches!(err, crate::error::StorageError::Duplicate(0)));
    }

    #[test]
    fn scan_surfaces_cancelled_instead_of_a_truncated_batch() {
        let store = TableStore::new(schema(), Arc::new(ChainStore::new()));
        let id = ObjectId::from_counter(1);
        let node = store.open_appendable(id);
        if let NodeState::Memory(m) = node.current() {
            m.append(
                Batch {
                    columns: vec![vec![Value::I64(1)], vec![Value::I64(10)]],
                },
                Timestamp::new(1, 0),
                TxnId(1),
                8192,
                256,
            );
            for (_, _, chain) in m.snapshot_blocks() {
                chain.commit_appends_in_range(0, 1, Timestamp::new(5, 0), &());
            }
        }
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = store.scan(Timestamp::new(10, 0), None, &[0, 1], &cancel).unwrap_err();
        assert!(matches!(err, crate::error::StorageError::Cancelled(_)));
    }
}
