use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tae_primitives::{ObjectId, Schema, TableId, Timestamp, TxnId};

use crate::db::DbEntry;
use crate::object::ObjectEntry;
use crate::state::EntryState;

/// One version of a table's schema, newest first in [`TableEntry::schema_history`].
pub struct SchemaVersion {
    pub schema: Schema,
    pub effective_ts: Timestamp,
}

/// A table entry in the catalog tree.
pub struct TableEntry {
    pub id: TableId,
    pub parent_db: Weak<DbEntry>,
    pub schema_history: RwLock<Vec<SchemaVersion>>,
    pub objects: RwLock<Vec<Arc<ObjectEntry>>>,
    /// Peer tree of tombstone (delete-record) objects, kept separate from
    /// `objects` so scans can skip it entirely.
    pub tombstone_objects: RwLock<Vec<Arc<ObjectEntry>>>,
    pub create_ts: Timestamp,
    pub create_txn: Option<TxnId>,
    pub drop_ts: RwLock<Option<Timestamp>>,
    pub state: RwLock<EntryState>,
    row_count: AtomicU64,
}

impl TableEntry {
    pub fn new(
        id: TableId,
        parent_db: Weak<DbEntry>,
        schema: Schema,
        create_ts: Timestamp,
        create_txn: Option<TxnId>,
    ) -> Self {
        TableEntry {
            id,
            parent_db,
            schema_history: RwLock::new(vec![SchemaVersion {
                schema,
                effective_ts: create_ts,
            }]),
            objects: RwLock::new(Vec::new()),
            tombstone_objects: RwLock::new(Vec::new()),
            create_ts,
            create_txn,
            drop_ts: RwLock::new(None),
            state: RwLock::new(EntryState::Creating),
            row_count: AtomicU64::new(0),
        }
    }

    pub fn current_schema(&self) -> Schema {
        self.schema_history.read()[0].schema.clone()
    }

    pub fn push_schema_version(&self, schema: Schema, effective_ts: Timestamp) {
        self.schema_history
            .write()
            .insert(0, SchemaVersion { schema, effective_ts });
    }

    /// Append-listener hook: called by the MVCC chain on commit of an append
    /// node. Tombstone appends decrement, data appends increment.
    pub fn on_append_committed(&self, rows: u64, is_tombstone: bool) {
        if is_tombstone {
            self.row_count.fetch_sub(rows, Ordering::SeqCst);
        } else {
            self.row_count.fetch_add(rows, Ordering::SeqCst);
        }
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::SeqCst)
    }

    pub fn find_object(&self, id: ObjectId) -> Option<Arc<ObjectEntry>> {
        self.objects
            .read()
            .iter()
            .chain(self.tombstone_objects.read().iter())
            .find(|o| o.id == id)
            .cloned()
    }
}
