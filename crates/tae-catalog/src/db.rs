use std::sync::Arc;

use parking_lot::RwLock;
use tae_primitives::{DbId, TableId, Timestamp, TxnId};

use crate::state::EntryState;
use crate::table::TableEntry;

/// A database entry in the catalog tree. The `lock` is the entry's own
/// read-write mutex guarding structural mutation of `tables`
/// (create/drop), distinct from the per-table locks each `TableEntry`
/// owns for its own children.
pub struct DbEntry {
    pub id: DbId,
    pub name: String,
    pub create_ts: Timestamp,
    pub create_txn: Option<TxnId>,
    pub drop_ts: RwLock<Option<Timestamp>>,
    pub state: RwLock<EntryState>,
    pub tables: RwLock<Vec<Arc<TableEntry>>>,
    lock: RwLock<()>,
}

impl DbEntry {
    pub fn new(id: DbId, name: String, create_ts: Timestamp, create_txn: Option<TxnId>) -> Self {
        DbEntry {
            id,
            name,
            create_ts,
            create_txn,
            drop_ts: RwLock::new(None),
            state: RwLock::new(EntryState::Creating),
            tables: RwLock::new(Vec::new()),
            lock: RwLock::new(()),
        }
    }

    /// Structural mutation guard: hold this write lock while inserting or
    /// removing entries from `tables`.
    pub fn write_guard(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    pub fn read_guard(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub fn find_table(&self, id: TableId) -> Option<Arc<TableEntry>> {
        self.tables.read().iter().find(|t| t.id == id).cloned()
    }
}
