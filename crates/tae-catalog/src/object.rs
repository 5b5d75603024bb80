use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::RwLock;
use tae_primitives::{ObjectId, TableId, Timestamp, TxnId};

use crate::block::BlockEntry;
use crate::state::EntryState;
use crate::table::TableEntry;

/// Whether an object still accepts appends or is frozen immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Appendable,
    NonAppendable,
}

/// Which engine produced (and owns compaction responsibility for) an
/// object's persisted bytes — the local engine or a remote compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedBy {
    LocalEngine,
    RemoteCompute,
}

/// Per-column zone-map bound. `max_truncated` marks a variable-length column
/// whose max was cut to a fixed prefix: comparisons needing the exact max
/// must treat the object as "possibly contains".
#[derive(Debug, Clone)]
pub struct ColumnZoneMap {
    pub min: tae_primitives::Value,
    pub max: tae_primitives::Value,
    pub max_truncated: bool,
}

/// Object-level statistics and pruning metadata. Row count and byte size
/// are atomics because append listeners update them without taking the
/// entry's lock.
#[derive(Debug, Default)]
pub struct ObjectStats {
    pub row_count: AtomicU32,
    pub byte_size: AtomicU64,
    pub block_count: AtomicU32,
    zone_maps: RwLock<Vec<ColumnZoneMap>>,
    bloom_filter_location: RwLock<Option<String>>,
}

impl ObjectStats {
    pub fn set_zone_maps(&self, maps: Vec<ColumnZoneMap>) {
        *self.zone_maps.write() = maps;
    }

    pub fn zone_map(&self, col: usize) -> Option<ColumnZoneMap> {
        self.zone_maps.read().get(col).cloned()
    }

    pub fn set_bloom_filter_location(&self, location: String) {
        *self.bloom_filter_location.write() = Some(location);
    }

    pub fn bloom_filter_location(&self) -> Option<String> {
        self.bloom_filter_location.read().clone()
    }
}

/// An object entry in the catalog tree.
pub struct ObjectEntry {
    pub id: ObjectId,
    pub parent_table: Weak<TableEntry>,
    pub stats: ObjectStats,
    pub kind: RwLock<ObjectKind>,
    pub persisted_by: PersistedBy,
    pub is_tombstone: bool,
    pub create_ts: Timestamp,
    pub create_txn: Option<TxnId>,
    pub drop_ts: RwLock<Option<Timestamp>>,
    pub state: RwLock<EntryState>,
    pub blocks: RwLock<Vec<BlockEntry>>,
}

impl ObjectEntry {
    pub fn new(
        id: ObjectId,
        parent_table: Weak<TableEntry>,
        kind: ObjectKind,
        persisted_by: PersistedBy,
        is_tombstone: bool,
        create_ts: Timestamp,
        create_txn: Option<TxnId>,
    ) -> Self {
        ObjectEntry {
            id,
            parent_table,
            stats: ObjectStats::default(),
            kind: RwLock::new(kind),
            persisted_by,
            is_tombstone,
            create_ts,
            create_txn,
            drop_ts: RwLock::new(None),
            state: RwLock::new(EntryState::Creating),
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn freeze(&self) {
        *self.kind.write() = ObjectKind::NonAppendable;
    }

    pub fn push_block(&self) -> u16 {
        let mut blocks = self.blocks.write();
        let offset = blocks.len() as u16;
        blocks.push(BlockEntry::new(self.id, offset));
        self.stats.block_count.fetch_add(1, Ordering::SeqCst);
        offset
    }

    pub fn table_id(&self) -> Option<TableId> {
        self.parent_table.upgrade().map(|t| t.id)
    }
}
