use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tae_primitives::{DbId, ObjectId, Schema, TableId, Timestamp, TxnId};

use crate::db::DbEntry;
use crate::error::{CatalogError, Result};
use crate::object::{ObjectEntry, ObjectKind, PersistedBy};
use crate::replay::{ReplayCommand, ReplayObserver};
use crate::state::EntryState;
use crate::table::TableEntry;
use crate::view::ReadView;

/// The MVCC-versioned metadata tree. Holds every database, keyed both by
/// name (for `GetDatabaseByName`) and by id (for the visibility-bypassing
/// `GetDatabaseByID` replay uses).
pub struct Catalog {
    by_name: RwLock<HashMap<String, Arc<DbEntry>>>,
    by_id: RwLock<HashMap<DbId, Arc<DbEntry>>>,
    next_db_id: AtomicU64,
    next_table_id: AtomicU64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            by_name: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            next_db_id: AtomicU64::new(1),
            next_table_id: AtomicU64::new(1),
        }
    }

    pub fn get_database_by_name(&self, name: &str, reader: &dyn ReadView) -> Result<Arc<DbEntry>> {
        let by_name = self.by_name.read();
        let entry = by_name.get(name).ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))?;
        let drop_ts = *entry.drop_ts.read();
        if crate::view::is_visible(entry.create_ts, entry.create_txn, drop_ts, reader) {
            Ok(entry.clone())
        } else {
            Err(CatalogError::DatabaseNotFound(name.to_string()))
        }
    }

    /// Bypasses visibility — used by replay, which must be able to find an
    /// entry regardless of what the recorded commit-TS is relative to it.
    pub fn get_database_by_id(&self, id: DbId) -> Result<Arc<DbEntry>> {
        self.by_id.read().get(&id).cloned().ok_or(CatalogError::DatabaseIdNotFound(id))
    }

    /// Every database ever created, dropped or not — for callers that need
    /// to walk the whole tree rather than address one entry by name or id
    /// (a facade wiring up table runtimes after replay, or the CLI listing
    /// what's on disk).
    pub fn databases(&self) -> Vec<Arc<DbEntry>> {
        self.by_id.read().values().cloned().collect()
    }

    pub fn create_database(&self, name: impl Into<String>, ts: Timestamp, txn: TxnId) -> Result<Arc<DbEntry>> {
        let name = name.into();
        let mut by_name = self.by_name.write();
        if let Some(existing) = by_name.get(&name) {
            if *existing.state.read() != EntryState::Dropped {
                return Err(CatalogError::DatabaseAlreadyExists(name));
            }
        }
        let id = DbId(self.next_db_id.fetch_add(1, Ordering::SeqCst));
        let entry = Arc::new(DbEntry::new(id, name.clone(), ts, Some(txn)));
        by_name.insert(name, entry.clone());
        self.by_id.write().insert(id, entry.clone());
        Ok(entry)
    }

    pub fn drop_database_by_name(&self, name: &str, txn: TxnId) -> Result<(bool, Arc<DbEntry>)> {
        let by_name = self.by_name.read();
        let entry = by_name.get(name).ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))?.clone();
        drop(by_name);
        let mut state = entry.state.write();
        if *state == EntryState::Dropped || *state == EntryState::Dropping {
            return Ok((false, entry.clone()));
        }
        *state = state.on_soft_delete()?;
        drop(state);
        let _ = txn;
        Ok((true, entry))
    }

    pub fn create_table(
        &self,
        db: &Arc<DbEntry>,
        schema: Schema,
        ts: Timestamp,
        txn: TxnId,
    ) -> Result<Arc<TableEntry>> {
        let id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        let entry = Arc::new(TableEntry::new(id, Arc::downgrade(db), schema, ts, Some(txn)));
        let _guard = db.write_guard();
        db.tables.write().push(entry.clone());
        Ok(entry)
    }

    /// Registers an object already identified by `id` (`tae-txn`/`tae-compaction`
    /// mint the id up front so the storage-layer node and the catalog entry
    /// agree on it before either is visible to anyone else).
    pub fn create_object(
        &self,
        table: &Arc<TableEntry>,
        id: ObjectId,
        kind: ObjectKind,
        is_tombstone: bool,
        ts: Timestamp,
        txn: TxnId,
    ) -> Result<Arc<ObjectEntry>> {
        let entry = Arc::new(ObjectEntry::new(
            id,
            Arc::downgrade(table),
            kind,
            PersistedBy::LocalEngine,
            is_tombstone,
            ts,
            Some(txn),
        ));
        if is_tombstone {
            table.tombstone_objects.write().push(entry.clone());
        } else {
            table.objects.write().push(entry.clone());
        }
        Ok(entry)
    }

    pub fn soft_delete_object(&self, table: &Arc<TableEntry>, id: ObjectId, _txn: TxnId) -> Result<()> {
        let object = table.find_object(id).ok_or(CatalogError::ObjectNotFound(id))?;
        let mut state = object.state.write();
        *state = state.on_soft_delete()?;
        Ok(())
    }

    /// Deterministic application of a recorded catalog command during
    /// recovery. Idempotent: if the target entry is already present at the
    /// recorded commit-TS, this is a no-op rather than an error.
    pub fn replay_command(
        &self,
        cmd: &ReplayCommand,
        observer: &dyn ReplayObserver,
    ) -> Result<()> {
        let result = self.apply_replay_command(cmd, observer);
        if let Err(ref e) = result {
            log::error!("fatal corruption replaying {cmd:?}: {e}");
        }
        result
    }

    fn apply_replay_command(&self, cmd: &ReplayCommand, observer: &dyn ReplayObserver) -> Result<()> {
        match cmd {
            ReplayCommand::CreateDatabase { id, name, create_ts } => {
                observer.observe_commit_ts(*create_ts);
                if self.by_id.read().contains_key(id) {
                    return Ok(());
                }
                let entry = Arc::new(DbEntry::new(*id, name.clone(), *create_ts, None));
                *entry.state.write() = EntryState::Committed;
                self.by_name.write().insert(name.clone(), entry.clone());
                self.by_id.write().insert(*id, entry);
                self.next_db_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                Ok(())
            }
            ReplayCommand::DropDatabase { id, drop_ts } => {
                observer.observe_commit_ts(*drop_ts);
                let entry = self
                    .by_id
                    .read()
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("database {id:?}")))?;
                if entry.drop_ts.read().is_some() {
                    return Ok(());
                }
                *entry.drop_ts.write() = Some(*drop_ts);
                *entry.state.write() = EntryState::Dropped;
                Ok(())
            }
            ReplayCommand::CreateTable {
                id,
                db_id,
                schema,
                create_ts,
            } => {
                observer.observe_commit_ts(*create_ts);
                let db = self
                    .by_id
                    .read()
                    .get(db_id)
                    .cloned()
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("database {db_id:?}")))?;
                if db.find_table(*id).is_some() {
                    return Ok(());
                }
                let table = Arc::new(TableEntry::new(*id, Arc::downgrade(&db), schema.clone(), *create_ts, None));
                *table.state.write() = EntryState::Committed;
                db.tables.write().push(table);
                self.next_table_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                Ok(())
            }
            ReplayCommand::DropTable { db_id, id, drop_ts } => {
                observer.observe_commit_ts(*drop_ts);
                let db = self
                    .by_id
                    .read()
                    .get(db_id)
                    .cloned()
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("database {db_id:?}")))?;
                let table = db
                    .find_table(*id)
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("table {id:?}")))?;
                if table.drop_ts.read().is_some() {
                    return Ok(());
                }
                *table.drop_ts.write() = Some(*drop_ts);
                *table.state.write() = EntryState::Dropped;
                Ok(())
            }
            ReplayCommand::CreateObject {
                id,
                table_id,
                db_id,
                kind,
                is_tombstone,
                create_ts,
            } => {
                observer.observe_commit_ts(*create_ts);
                let db = self
                    .by_id
                    .read()
                    .get(db_id)
                    .cloned()
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("database {db_id:?}")))?;
                let table = db
                    .find_table(*table_id)
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("table {table_id:?}")))?;
                if table.find_object(*id).is_some() {
                    return Ok(());
                }
                let object = Arc::new(ObjectEntry::new(
                    *id,
                    Arc::downgrade(&table),
                    *kind,
                    PersistedBy::LocalEngine,
                    *is_tombstone,
                    *create_ts,
                    None,
                ));
                *object.state.write() = EntryState::Committed;
                if *is_tombstone {
                    table.tombstone_objects.write().push(object);
                } else {
                    table.objects.write().push(object);
                }
                Ok(())
            }
            ReplayCommand::DropObject {
                db_id,
                table_id,
                id,
                drop_ts,
            } => {
                observer.observe_commit_ts(*drop_ts);
                let db = self
                    .by_id
                    .read()
                    .get(db_id)
                    .cloned()
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("database {db_id:?}")))?;
                let table = db
                    .find_table(*table_id)
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("table {table_id:?}")))?;
                let object = table
                    .find_object(*id)
                    .ok_or_else(|| CatalogError::ReplayTargetMissing(format!("object {id}")))?;
                if object.drop_ts.read().is_some() {
                    return Ok(());
                }
                *object.drop_ts.write() = Some(*drop_ts);
                *object.state.write() = EntryState::Dropped;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Snapshot;

    #[test]
    fn create_then_lookup_by_name_is_visible_at_later_ts() {
        let cat = Catalog::new();
        let ts = Timestamp::new(10, 0);
        cat.create_database("app", ts, TxnId(1)).unwrap();
        let reader = Snapshot(Timestamp::new(20, 0));
        assert!(cat.get_database_by_name("app", &reader).is_ok());
    }

    #[test]
    fn create_is_invisible_before_create_ts() {
        let cat = Catalog::new();
        cat.create_database("app", Timestamp::new(10, 0), TxnId(1)).unwrap();
        let reader = Snapshot(Timestamp::new(5, 0));
        assert!(cat.get_database_by_name("app", &reader).is_err());
    }

    #[test]
    fn duplicate_name_fails_with_already_exists() {
        let cat = Catalog::new();
        cat.create_database("app", Timestamp::new(1, 0), TxnId(1)).unwrap();
        let err = cat.create_database("app", Timestamp::new(2, 0), TxnId(2)).unwrap_err();
        assert!(matches!(err, CatalogError::DatabaseAlreadyExists(_)));
    }

    #[test]
    fn drop_then_lookup_after_drop_ts_is_not_found() {
        let cat = Catalog::new();
        cat.create_database("app", Timestamp::new(1, 0), TxnId(1)).unwrap();
        let (had_effect, entry) = cat.drop_database_by_name("app", TxnId(2)).unwrap();
        assert!(had_effect);
        *entry.state.write() = entry.state.read().on_commit().unwrap();
        *entry.drop_ts.write() = Some(Timestamp::new(5, 0));
        let reader = Snapshot(Timestamp::new(10, 0));
        assert!(cat.get_database_by_name("app", &reader).is_err());
        let reader_before = Snapshot(Timestamp::new(2, 0));
        assert!(cat.get_database_by_name("app", &reader_before).is_ok());
    }

    #[test]
    fn replay_create_database_is_idempotent() {
        let cat = Catalog::new();
        struct NoopObserver;
        impl ReplayObserver for NoopObserver {
            fn observe_commit_ts(&self, _ts: Timestamp) {}
        }
        let cmd = ReplayCommand::CreateDatabase {
            id: DbId(1),
            name: "app".to_string(),
            create_ts: Timestamp::new(1, 0),
        };
        cat.replay_command(&cmd, &NoopObserver).unwrap();
        cat.replay_command(&cmd, &NoopObserver).unwrap();
        assert_eq!(cat.by_id.read().len(), 1);
    }

    #[test]
    fn replay_missing_target_is_fatal() {
        let cat = Catalog::new();
        struct NoopObserver;
        impl ReplayObserver for NoopObserver {
            fn observe_commit_ts(&self, _ts: Timestamp) {}
        }
        let cmd = ReplayCommand::CreateTable {
            id: TableId(1),
            db_id: DbId(99),
            schema: Schema::default(),
            create_ts: Timestamp::new(1, 0),
        };
        assert!(cat.replay_command(&cmd, &NoopObserver).is_err());
    }
}
