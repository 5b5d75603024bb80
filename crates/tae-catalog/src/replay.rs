use tae_primitives::{DbId, ObjectId, Schema, TableId, Timestamp};

use crate::object::ObjectKind;

/// One parsed catalog command from a WAL transaction record, applied to
/// the catalog with its recorded commit-TS during replay.
#[derive(Debug, Clone)]
pub enum ReplayCommand {
    CreateDatabase {
        id: DbId,
        name: String,
        create_ts: Timestamp,
    },
    DropDatabase {
        id: DbId,
        drop_ts: Timestamp,
    },
    CreateTable {
        id: TableId,
        db_id: DbId,
        schema: Schema,
        create_ts: Timestamp,
    },
    DropTable {
        db_id: DbId,
        id: TableId,
        drop_ts: Timestamp,
    },
    CreateObject {
        id: ObjectId,
        table_id: TableId,
        db_id: DbId,
        kind: ObjectKind,
        is_tombstone: bool,
        create_ts: Timestamp,
    },
    DropObject {
        db_id: DbId,
        table_id: TableId,
        id: ObjectId,
        drop_ts: Timestamp,
    },
}

/// Tracks the maximum applied commit-TS across a replay pass; the system's
/// start-TS is seeded from this value plus an epsilon.
pub trait ReplayObserver {
    fn observe_commit_ts(&self, ts: Timestamp);
}

/// A [`ReplayObserver`] that folds into a [`tae_primitives::TsoAllocator`]
/// via [`tae_primitives::TsoAllocator::observe`].
pub struct TsoObserver<'a>(pub &'a tae_primitives::TsoAllocator);

impl ReplayObserver for TsoObserver<'_> {
    fn observe_commit_ts(&self, ts: Timestamp) {
        self.0.observe(ts);
    }
}
