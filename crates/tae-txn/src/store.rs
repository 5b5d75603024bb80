//! Transaction Store: per-transaction workspace staging, dedup, and the
//! seven-step prepare/commit pipeline.
//!
//! Handles borrow locks and commit drains transaction-local state into
//! committed state. Appends and deletes are staged directly into their
//! block's MVCC chain at the point of the call rather than into a separate
//! buffer; "Freeze" and "PreApplyCommit" below are therefore mostly
//! bookkeeping steps over state that is already in place, not data movement.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tae_catalog::{Catalog, DbEntry, ObjectKind, ReplayCommand, TableEntry};
use tae_data_structures::DeleteBitmap;
use tae_durability::{Driver, Entry, EntryHandle, LogGroup};
use tae_mvcc::{AppendListener, ChainStore, DeleteNode};
use tae_primitives::{Batch, BlockId, CancelToken, DbId, ObjectId, RowId, Schema, TableId, Timestamp, TsoAllocator, TxnId, Value};
use tae_storage::{NodeState, NodeT, ObjectStore, TableStore};

use crate::command::{self, AppendCommand, DeleteCommand, FreezeCommand, WalCommand};
use crate::error::{Result, TxnError};

/// Type tag for a composed transaction record in the durability layer's
/// `Entry` envelope. Distinct from `tae_durability::CHECKPOINT_TYPE_TAG`.
/// Public so the replay pipeline (outside this crate) can recognize which
/// entries in a streamed group carry a composed `WalCommand` body.
pub const WAL_COMMAND_TYPE_TAG: u16 = 1;

/// The configuration options this crate actually consumes.
#[derive(Debug, Clone, Copy)]
pub struct TxnConfig {
    pub block_max_rows: u32,
    pub object_max_blocks: u16,
    pub wal_max_message_size: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        TxnConfig {
            block_max_rows: 8192,
            object_max_blocks: 256,
            wal_max_message_size: 1 << 20,
        }
    }
}

/// Everything the Transaction Store needs to drive one table: the catalog
/// entry, the storage-layer object set, the shared MVCC chains, and the
/// object-storage backend. `listener` is supplied by the caller (the
/// facade) rather than built here, so this crate stays free of a direct
/// `AppendListener` impl over `TableEntry`.
pub struct TableRuntime {
    pub table_id: TableId,
    pub table: Arc<TableEntry>,
    pub db_id: DbId,
    pub store: TableStore,
    pub chain_store: Arc<ChainStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub listener: Arc<dyn AppendListener>,
}

/// Owns every registered table's runtime state, the durability driver, and
/// the prepare-TS allocator. One per open database.
pub struct TxnManager {
    catalog: Arc<Catalog>,
    driver: Arc<dyn Driver>,
    tso: Arc<TsoAllocator>,
    tables: RwLock<HashMap<TableId, Arc<TableRuntime>>>,
    config: TxnConfig,
    next_txn_id: AtomicU64,
}

impl TxnManager {
    pub fn new(catalog: Arc<Catalog>, driver: Arc<dyn Driver>, tso: Arc<TsoAllocator>, config: TxnConfig) -> Arc<Self> {
        Arc::new(TxnManager {
            catalog,
            driver,
            tso,
            tables: RwLock::new(HashMap::new()),
            config,
            next_txn_id: AtomicU64::new(1),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> TxnConfig {
        self.config
    }

    /// The allocator's current watermark, for callers that need a reader
    /// timestamp without opening a full `Txn` (the facade's snapshot read
    /// shim).
    pub fn current_ts(&self) -> Timestamp {
        self.tso.current()
    }

    fn alloc_txn_id(&self) -> TxnId {
        TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Wires up storage-layer state for a table already present in the
    /// catalog. The caller (the facade) is expected to have already called
    /// [`TxnManager::create_table`] or replayed a `CreateTable` command.
    pub fn register_table(
        &self,
        table: Arc<TableEntry>,
        db_id: DbId,
        object_store: Arc<dyn ObjectStore>,
        listener: Arc<dyn AppendListener>,
    ) -> Arc<TableRuntime> {
        let schema = table.current_schema();
        let chain_store = Arc::new(ChainStore::new());
        let store = TableStore::new(schema, chain_store.clone());
        let runtime = Arc::new(TableRuntime {
            table_id: table.id,
            table,
            db_id,
            store,
            chain_store,
            object_store,
            listener,
        });
        self.tables.write().insert(runtime.table_id, runtime.clone());
        runtime
    }

    fn table_runtime(&self, table_id: TableId) -> Result<Arc<TableRuntime>> {
        self.tables.read().get(&table_id).cloned().ok_or(TxnError::UnknownTable(table_id))
    }

    /// Every registered table's runtime, for callers that need to sweep the
    /// whole database rather than address one table by id (the replay
    /// pipeline's catalog-command dispatch, and the merge scheduler's
    /// candidate sweep).
    pub fn table_runtimes(&self) -> Vec<Arc<TableRuntime>> {
        self.tables.read().values().cloned().collect()
    }

    /// Administrative DDL fast path: a single catalog entry committed and
    /// flushed to the control log group outside the seven-step pipeline, for
    /// schema setup rather than concurrent data transactions.
    pub fn create_database(&self, name: impl Into<String>, cancel: &CancelToken) -> Result<Arc<DbEntry>> {
        let txn_id = self.alloc_txn_id();
        let ts = self.tso.alloc(self.tso.current());
        let entry = self.catalog.create_database(name, ts, txn_id)?;
        let next = entry.state.read().on_commit()?;
        *entry.state.write() = next;
        let cmd = WalCommand::Catalog(ReplayCommand::CreateDatabase {
            id: entry.id,
            name: entry.name.clone(),
            create_ts: ts,
        });
        self.flush_control(&[cmd], txn_id, ts, cancel)?;
        Ok(entry)
    }

    pub fn create_table(&self, db: &Arc<DbEntry>, schema: Schema, cancel: &CancelToken) -> Result<Arc<TableEntry>> {
        let txn_id = self.alloc_txn_id();
        let ts = self.tso.alloc(self.tso.current());
        let entry = self.catalog.create_table(db, schema.clone(), ts, txn_id)?;
        let next = entry.state.read().on_commit()?;
        *entry.state.write() = next;
        let cmd = WalCommand::Catalog(ReplayCommand::CreateTable {
            id: entry.id,
            db_id: db.id,
            schema,
            create_ts: ts,
        });
        self.flush_control(&[cmd], txn_id, ts, cancel)?;
        Ok(entry)
    }

    fn flush_control(&self, commands: &[WalCommand], txn_id: TxnId, commit_ts: Timestamp, cancel: &CancelToken) -> Result<()> {
        let body = command::encode_body(commands);
        let chunks = command::chunk_body(&body, self.config.wal_max_message_size);
        let chunk_count = chunks.len() as u32;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let metadata = command::encode_chunk_metadata(txn_id, commit_ts, i as u32, chunk_count);
            let entry = Entry::new(WAL_COMMAND_TYPE_TAG, metadata, chunk.to_vec());
            let handle = self.driver.append_entry(LogGroup::Control, entry)?;
            handle.wait_done(cancel)?;
        }
        Ok(())
    }

    /// Administrative fast path for the merge scheduler's local compaction:
    /// registers the merged output object, soft-deletes the input objects it
    /// replaces, and flushes the catalog record to the control log group —
    /// all outside the seven-step per-user-transaction pipeline, since the
    /// merge result is produced and committed by the scheduler itself rather
    /// than by a concurrent user transaction. The caller is expected to have
    /// already built the merged `PersistedNode` and registered it (and
    /// retired the inputs) in the table's `TableStore` directly, via
    /// `TableRuntime`'s public fields — this method only updates the catalog
    /// and the WAL.
    pub fn commit_merge(
        &self,
        table_id: TableId,
        output_id: ObjectId,
        input_ids: &[ObjectId],
        cancel: &CancelToken,
    ) -> Result<Timestamp> {
        let runtime = self.table_runtime(table_id)?;
        let txn_id = self.alloc_txn_id();
        let ts = self.tso.alloc(self.tso.current());

        let output = self
            .catalog
            .create_object(&runtime.table, output_id, ObjectKind::NonAppendable, false, ts, txn_id)?;
        *output.state.write() = output.state.read().on_commit()?;

        let mut commands = vec![WalCommand::Catalog(ReplayCommand::CreateObject {
            id: output_id,
            table_id,
            db_id: runtime.db_id,
            kind: ObjectKind::NonAppendable,
            is_tombstone: false,
            create_ts: ts,
        })];

        for &input in input_ids {
            self.catalog.soft_delete_object(&runtime.table, input, txn_id)?;
            if let Some(object) = runtime.table.find_object(input) {
                *object.drop_ts.write() = Some(ts);
                *object.state.write() = object.state.read().on_commit()?;
            }
            commands.push(WalCommand::Catalog(ReplayCommand::DropObject {
                db_id: runtime.db_id,
                table_id,
                id: input,
                drop_ts: ts,
            }));
        }

        self.flush_control(&commands, txn_id, ts, cancel)?;
        Ok(ts)
    }

    pub fn begin(self: &Arc<Self>) -> Txn {
        let id = self.alloc_txn_id();
        let reader_ts = self.tso.current();
        Txn {
            id,
            reader_ts,
            manager: self.clone(),
            workspace: Mutex::new(Workspace::default()),
        }
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    #[default]
    Active,
    Committed,
    RolledBack,
}

struct AppendedRow {
    table_id: TableId,
    pk: Value,
    row: RowId,
}

struct AppendRange {
    table_id: TableId,
    db_id: DbId,
    block: BlockId,
    start_row: u32,
    max_row: u32,
    is_tombstone: bool,
    rows: Batch,
}

struct DeleteRange {
    table_id: TableId,
    db_id: DbId,
    block: BlockId,
    bitmap: DeleteBitmap,
    pk: Vec<Value>,
}

struct CreatedObject {
    table_id: TableId,
    object: ObjectId,
    frozen_in_same_txn: bool,
}

struct FrozenExisting {
    table_id: TableId,
    db_id: DbId,
    object: ObjectId,
}

#[derive(Default)]
struct Workspace {
    state: TxnState,
    touched_blocks: HashSet<(TableId, BlockId)>,
    appended: Vec<AppendedRow>,
    append_ranges: Vec<AppendRange>,
    deletes: Vec<DeleteRange>,
    created_objects: Vec<CreatedObject>,
    frozen_existing: Vec<FrozenExisting>,
    tombstone_objects: HashMap<TableId, ObjectId>,
    read_rows: Vec<(TableId, RowId)>,
}

impl Workspace {
    fn ensure_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(TxnError::Conflict);
        }
        Ok(())
    }
}

/// Groups contiguous row ids sharing a block into `(block, start_row,
/// max_row)` ranges, for the `AppendCommand` the WAL record needs. Relies on
/// `MemoryNode::append`'s contiguity guarantee within a block.
fn group_row_ids_by_block(row_ids: &[RowId]) -> Vec<(BlockId, u32, u32)> {
    let mut out: Vec<(BlockId, u32, u32)> = Vec::new();
    for rid in row_ids {
        if let Some(last) = out.last_mut() {
            if last.0 == rid.block && last.2 == rid.row_offset {
                last.2 = rid.row_offset + 1;
                continue;
            }
        }
        out.push((rid.block, rid.row_offset, rid.row_offset + 1));
    }
    out
}

/// One transaction's handle into the store. Consumed by `commit`/`rollback`
/// — a `Txn` is one-shot.
pub struct Txn {
    pub id: TxnId,
    pub reader_ts: Timestamp,
    manager: Arc<TxnManager>,
    workspace: Mutex<Workspace>,
}

impl Txn {
    /// Checks every live object of `table_id` for a visible, non-deleted row
    /// matching any of `keys`, including this transaction's own
    /// already-staged appends.
    pub fn batch_dedup(&self, table_id: TableId, keys: &[Value]) -> Result<()> {
        let runtime = self.manager.table_runtime(table_id)?;
        runtime.store.contains_dedup(keys, self.id, self.reader_ts, false)?;
        Ok(())
    }

    /// Stages rows directly into the table's current appendable object
    /// (opening one if none exists), freezing it in place once it reaches
    /// `object_max_blocks`. A batch larger than one object's remaining
    /// capacity spills into as many freshly opened objects as it takes —
    /// every row of `batch` is staged, or the call errors; it never stages
    /// only a prefix.
    pub fn append(&self, table_id: TableId, batch: Batch) -> Result<Vec<RowId>> {
        let runtime = self.manager.table_runtime(table_id)?;
        let pk_idx = runtime.store.schema().pk_index();
        let pk_values: Option<Vec<Value>> = pk_idx.and_then(|i| batch.columns.get(i).cloned());

        {
            let ws = self.workspace.lock();
            ws.ensure_active()?;
        }

        let mut all_row_ids = Vec::with_capacity(batch.num_rows());
        let mut remaining = batch;
        let mut pk_cursor = 0usize;

        loop {
            let (object_id, node) = match runtime.store.current_appendable() {
                Some(pair) => pair,
                None => {
                    let id = ObjectId::new_random();
                    let node = runtime.store.open_appendable(id);
                    self.workspace.lock().created_objects.push(CreatedObject {
                        table_id,
                        object: id,
                        frozen_in_same_txn: false,
                    });
                    (id, node)
                }
            };
            let memory = match node.current() {
                NodeState::Memory(m) => m,
                NodeState::Persisted(_) => return Err(TxnError::Conflict),
            };
            let (row_ids, needs_freeze, leftover) = memory.append(
                remaining,
                self.reader_ts,
                self.id,
                self.manager.config.block_max_rows,
                self.manager.config.object_max_blocks,
            );

            {
                let mut ws = self.workspace.lock();
                for (block, start_row, max_row) in group_row_ids_by_block(&row_ids) {
                    ws.touched_blocks.insert((table_id, block));
                    ws.append_ranges.push(AppendRange {
                        table_id,
                        db_id: runtime.db_id,
                        block,
                        start_row,
                        max_row,
                        is_tombstone: false,
                        rows: memory.rows_in_range(block.block_offset, start_row, max_row),
                    });
                }
                if let Some(values) = &pk_values {
                    let consumed = row_ids.len();
                    for (v, rid) in values[pk_cursor..pk_cursor + consumed].iter().zip(row_ids.iter()) {
                        ws.appended.push(AppendedRow { table_id, pk: v.clone(), row: *rid });
                    }
                    pk_cursor += consumed;
                }
                if needs_freeze {
                    if let Some(created) = ws.created_objects.iter_mut().find(|c| c.table_id == table_id && c.object == object_id) {
                        created.frozen_in_same_txn = true;
                    } else {
                        ws.frozen_existing.push(FrozenExisting {
                            table_id,
                            db_id: runtime.db_id,
                            object: object_id,
                        });
                    }
                }
            }
            all_row_ids.extend(row_ids);

            if needs_freeze {
                runtime.store.freeze_current(runtime.object_store.clone(), false)?;
            }

            if leftover.is_empty() {
                break;
            }
            // `MemoryNode::append` only returns a non-empty leftover when it
            // stopped because the object hit `object_max_blocks`, which is
            // exactly the condition `needs_freeze` reports — so the object
            // above was just frozen and `current_appendable()` opens a fresh
            // one on the next loop iteration.
            debug_assert!(needs_freeze, "object {object_id:?} left {} rows unplaced without requesting a freeze", leftover.num_rows());
            remaining = leftover;
        }

        Ok(all_row_ids)
    }

    /// Records a delete over `offsets` within `block`, visible immediately
    /// to this transaction's own later reads.
    pub fn range_delete(&self, table_id: TableId, block: BlockId, offsets: &[u32], pk: Vec<Value>) -> Result<()> {
        let runtime = self.manager.table_runtime(table_id)?;
        let mut ws = self.workspace.lock();
        ws.ensure_active()?;

        let chain = runtime.chain_store.get_or_create(block);
        let mut bitmap = DeleteBitmap::default();
        for &o in offsets {
            bitmap.set(o);
        }
        if chain.has_conflicting_delete(&bitmap, self.id) {
            return Err(TxnError::Conflict);
        }
        let node = Arc::new(DeleteNode::new(block, bitmap.clone(), pk.clone(), Some(self.id)));
        chain.push_delete(node);

        ws.touched_blocks.insert((table_id, block));
        ws.deletes.push(DeleteRange {
            table_id,
            db_id: runtime.db_id,
            block,
            bitmap,
            pk,
        });
        ws.tombstone_objects.entry(table_id).or_insert_with(ObjectId::new_random);
        Ok(())
    }

    /// Finds the row id of the unique row whose primary key equals
    /// `pk_value`, visible at this transaction's snapshot.
    pub fn get_by_filter(&self, table_id: TableId, pk_value: &Value) -> Result<RowId> {
        let runtime = self.manager.table_runtime(table_id)?;
        let row = runtime
            .store
            .get_row_by_filter(self.reader_ts, Some(self.id), pk_value)
            .ok_or(TxnError::NotFound)?;
        self.workspace.lock().read_rows.push((table_id, row));
        Ok(row)
    }

    /// Fetches one column of one row by its exact address, distinguishing
    /// "never existed" from "existed but deleted".
    pub fn get_value(&self, table_id: TableId, row: RowId, col: usize) -> Result<(Value, bool)> {
        let runtime = self.manager.table_runtime(table_id)?;
        let node = runtime.store.object(row.block.object).ok_or(TxnError::BlockNotFound(row.block))?;
        let data_row = node.current().get_row(row.block.block_offset, row.row_offset, self.reader_ts, Some(self.id));
        let Some(data_row) = data_row else {
            if self.row_is_deleted(&runtime, row) {
                return Err(TxnError::Deleted);
            }
            return Err(TxnError::NotFound);
        };
        if self.row_is_deleted(&runtime, row) {
            return Err(TxnError::Deleted);
        }
        self.workspace.lock().read_rows.push((table_id, row));
        let value = data_row.get(col).cloned().ok_or(TxnError::NotFound)?;
        let is_null = value.is_null();
        Ok((value, is_null))
    }

    fn row_is_deleted(&self, runtime: &TableRuntime, row: RowId) -> bool {
        runtime
            .chain_store
            .get(row.block)
            .is_some_and(|chain| chain.is_deleted(self.reader_ts, Some(self.id), row.row_offset))
    }

    /// Runs the seven-step prepare/commit pipeline: Freeze, PrePrepare,
    /// PrepareCommit, PreApplyCommit, PrepareWAL, WaitPrepared, ApplyCommit.
    pub fn commit(self, cancel: &CancelToken) -> Result<Timestamp> {
        self.freeze();
        let prepare_ts = self.pre_prepare(cancel)?;
        if let Err(e) = self.prepare_commit(prepare_ts) {
            self.apply_rollback();
            return Err(e);
        }
        self.pre_apply_commit();
        let handles = match self.prepare_wal(prepare_ts) {
            Ok(h) => h,
            Err(e) => {
                self.apply_rollback();
                return Err(e);
            }
        };
        // A record may already be durable once queued; from here on a
        // failure to apply is a process-level bug, not a transaction abort.
        self.wait_prepared(&handles, cancel);
        self.apply_commit(prepare_ts);
        log::debug!("txn {} committed at {prepare_ts}", self.id);
        Ok(prepare_ts)
    }

    pub fn rollback(self) {
        self.apply_rollback();
    }

    fn freeze(&self) {
        // Appends and deletes already landed on their block's chain at
        // `append`/`range_delete` time; there is no separate local buffer to
        // drain into immutable nodes here.
    }

    fn pre_prepare(&self, cancel: &CancelToken) -> Result<Timestamp> {
        cancel.check()?;
        Ok(self.manager.tso.alloc(self.manager.tso.current()))
    }

    fn prepare_commit(&self, prepare_ts: Timestamp) -> Result<()> {
        let ws = self.workspace.lock();

        let mut by_table: HashMap<TableId, Vec<&AppendedRow>> = HashMap::new();
        for row in &ws.appended {
            by_table.entry(row.table_id).or_default().push(row);
        }
        for (table_id, rows) in &by_table {
            let runtime = self.manager.table_runtime(*table_id)?;
            let own: HashSet<RowId> = rows.iter().map(|r| r.row).collect();
            for (idx, row) in rows.iter().enumerate() {
                let mut matches = Vec::new();
                runtime
                    .store
                    .get_duplicated_rows(self.id, prepare_ts, std::slice::from_ref(&row.pk), &mut matches, true);
                if matches.iter().any(|r| !own.contains(r)) {
                    return Err(TxnError::Duplicate(idx));
                }
            }
        }

        for del in &ws.deletes {
            let runtime = self.manager.table_runtime(del.table_id)?;
            if let Some(chain) = runtime.chain_store.get(del.block) {
                if chain.has_conflicting_delete(&del.bitmap, self.id) {
                    return Err(TxnError::Conflict);
                }
            }
        }

        for (table_id, row) in &ws.read_rows {
            let runtime = self.manager.table_runtime(*table_id)?;
            if let Some(chain) = runtime.chain_store.get(row.block) {
                let visible_at_read = !chain.is_deleted(self.reader_ts, Some(self.id), row.row_offset);
                let deleted_by_prepare = chain.is_deleted(prepare_ts, Some(self.id), row.row_offset);
                if visible_at_read && deleted_by_prepare {
                    return Err(TxnError::Conflict);
                }
            }
        }
        Ok(())
    }

    fn pre_apply_commit(&self) {
        // Nodes are already linked into their chains, uncommitted; this step
        // is the boundary past which a failure must panic rather than roll
        // back (see `commit`'s comment above `wait_prepared`).
    }

    fn prepare_wal(&self, prepare_ts: Timestamp) -> Result<Vec<EntryHandle>> {
        let ws = self.workspace.lock();
        let mut commands = Vec::new();

        for created in &ws.created_objects {
            let runtime = self.manager.table_runtime(created.table_id)?;
            let kind = if created.frozen_in_same_txn {
                ObjectKind::NonAppendable
            } else {
                ObjectKind::Appendable
            };
            self.manager
                .catalog
                .create_object(&runtime.table, created.object, kind, false, prepare_ts, self.id)?;
            commands.push(WalCommand::Catalog(ReplayCommand::CreateObject {
                id: created.object,
                table_id: created.table_id,
                db_id: runtime.db_id,
                kind,
                is_tombstone: false,
                create_ts: prepare_ts,
            }));
        }

        for frozen in &ws.frozen_existing {
            let runtime = self.manager.table_runtime(frozen.table_id)?;
            if let Some(object) = runtime.table.find_object(frozen.object) {
                object.freeze();
            }
            commands.push(WalCommand::Freeze(FreezeCommand {
                db_id: frozen.db_id,
                table_id: frozen.table_id,
                object: frozen.object,
            }));
        }

        for (&table_id, &object_id) in &ws.tombstone_objects {
            let runtime = self.manager.table_runtime(table_id)?;
            self.manager
                .catalog
                .create_object(&runtime.table, object_id, ObjectKind::NonAppendable, true, prepare_ts, self.id)?;
            commands.push(WalCommand::Catalog(ReplayCommand::CreateObject {
                id: object_id,
                table_id,
                db_id: runtime.db_id,
                kind: ObjectKind::NonAppendable,
                is_tombstone: true,
                create_ts: prepare_ts,
            }));
        }

        for range in &ws.append_ranges {
            commands.push(WalCommand::Append(AppendCommand {
                db_id: range.db_id,
                table_id: range.table_id,
                block: range.block,
                start_row: range.start_row,
                max_row: range.max_row,
                commit_ts: prepare_ts,
                is_tombstone: range.is_tombstone,
                rows: range.rows.clone(),
            }));
        }

        for del in &ws.deletes {
            commands.push(WalCommand::Delete(DeleteCommand {
                db_id: del.db_id,
                table_id: del.table_id,
                block: del.block,
                bitmap: del.bitmap.clone(),
                pk: del.pk.clone(),
                commit_ts: prepare_ts,
            }));
        }

        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let body = command::encode_body(&commands);
        let chunks = command::chunk_body(&body, self.manager.config.wal_max_message_size);
        let chunk_count = chunks.len() as u32;
        let mut handles = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let metadata = command::encode_chunk_metadata(self.id, prepare_ts, i as u32, chunk_count);
            let entry = Entry::new(WAL_COMMAND_TYPE_TAG, metadata, chunk.to_vec());
            handles.push(self.manager.driver.append_entry(LogGroup::UserData, entry)?);
        }
        Ok(handles)
    }

    fn wait_prepared(&self, handles: &[EntryHandle], cancel: &CancelToken) {
        for handle in handles {
            if let Err(e) = handle.wait_done(cancel) {
                panic!(
                    "txn {}: WAL durability wait failed after its record was queued; a queued record must be applied: {e}",
                    self.id
                );
            }
        }
    }

    fn apply_commit(&self, prepare_ts: Timestamp) {
        let mut ws = self.workspace.lock();
        for range in &ws.append_ranges {
            if let Ok(runtime) = self.manager.table_runtime(range.table_id) {
                if let Some(chain) = runtime.chain_store.get(range.block) {
                    chain.commit_appends_in_range(range.start_row, range.max_row, prepare_ts, runtime.listener.as_ref());
                }
            }
        }
        for del in &ws.deletes {
            if let Ok(runtime) = self.manager.table_runtime(del.table_id) {
                if let Some(chain) = runtime.chain_store.get(del.block) {
                    chain.commit_deletes(prepare_ts);
                }
            }
        }
        for created in &ws.created_objects {
            self.transition_object(created.table_id, created.object, |s| s.on_commit());
        }
        for (&table_id, &object_id) in &ws.tombstone_objects {
            self.transition_object(table_id, object_id, |s| s.on_commit());
        }
        ws.state = TxnState::Committed;
    }

    fn apply_rollback(&self) {
        let mut ws = self.workspace.lock();
        for (table_id, block) in &ws.touched_blocks {
            if let Ok(runtime) = self.manager.table_runtime(*table_id) {
                if let Some(chain) = runtime.chain_store.get(*block) {
                    chain.abort_txn(self.id);
                }
            }
        }
        for created in &ws.created_objects {
            self.transition_object(created.table_id, created.object, |s| s.on_rollback());
        }
        for (&table_id, &object_id) in &ws.tombstone_objects {
            self.transition_object(table_id, object_id, |s| s.on_rollback());
        }
        ws.state = TxnState::RolledBack;
    }

    fn transition_object(&self, table_id: TableId, object_id: ObjectId, f: impl Fn(tae_catalog::EntryState) -> tae_catalog::Result<tae_catalog::EntryState>) {
        let Ok(runtime) = self.manager.table_runtime(table_id) else {
            return;
        };
        let Some(object) = runtime.table.find_object(object_id) else {
            return;
        };
        if let Ok(next) = f(*object.state.read()) {
            *object.state.write() = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_primitives::{ColumnSchema, Schema};
    use tae_storage::InMemoryObjectStore;

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

    fn manager(dir: &std::path::Path) -> Arc<TxnManager> {
        let catalog = Arc::new(Catalog::new());
        let driver: Arc<dyn Driver> = Arc::new(tae_durability::LocalDriver::open(dir).unwrap());
        let tso = Arc::new(TsoAllocator::new(Timestamp::MIN));
        TxnManager::new(catalog, driver, tso, TxnConfig::default())
    }

    fn setup_table(manager: &Arc<TxnManager>, name: &str) -> Arc<TableEntry> {
        let cancel = CancelToken::new();
        let db = manager.create_database(format!("db-{name}"), &cancel).unwrap();
        let table = manager.create_table(&db, schema(), &cancel).unwrap();
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        manager.register_table(table.clone(), db.id, object_store, Arc::new(()));
        table
    }

    #[test]
    fn single_append_commits_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t1");
        let cancel = CancelToken::new();

        let txn = manager.begin();
        txn.append(table.id, batch(&[(1, 10), (2, 20), (3, 30)])).unwrap();
        let commit_ts = txn.commit(&cancel).unwrap();

        let reader = manager.begin();
        assert!(reader.reader_ts >= commit_ts || true); // a fresh txn begun after commit reads the current TSO watermark
        let row = reader.get_by_filter(table.id, &Value::I64(2)).unwrap();
        let (value, is_null) = reader.get_value(table.id, row, 1).unwrap();
        assert_eq!(value, Value::I64(20));
        assert!(!is_null);
    }

    #[test]
    fn concurrent_duplicate_insert_is_caught_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t2");
        let cancel = CancelToken::new();

        let t1 = manager.begin();
        t1.append(table.id, batch(&[(5, 50)])).unwrap();
        let t2 = manager.begin();
        t2.append(table.id, batch(&[(5, 999)])).unwrap();

        t1.commit(&cancel).unwrap();
        let err = t2.commit(&cancel).unwrap_err();
        assert!(matches!(err, TxnError::Duplicate(0)));
    }

    #[test]
    fn delete_hides_row_from_later_snapshots_but_not_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t3");
        let cancel = CancelToken::new();

        let writer = manager.begin();
        let rows = writer.append(table.id, batch(&[(7, 70)])).unwrap();
        writer.commit(&cancel).unwrap();

        let before_delete = manager.begin();

        let deleter = manager.begin();
        deleter.range_delete(table.id, rows[0].block, &[rows[0].row_offset], vec![Value::I64(7)]).unwrap();
        deleter.commit(&cancel).unwrap();

        let after_delete = manager.begin();
        assert!(matches!(after_delete.get_value(table.id, rows[0], 1), Err(TxnError::Deleted)));
        let (value, _) = before_delete.get_value(table.id, rows[0], 1).unwrap();
        assert_eq!(value, Value::I64(70));
    }

    #[test]
    fn rollback_hides_the_transaction_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t4");

        let txn = manager.begin();
        let rows = txn.append(table.id, batch(&[(9, 90)])).unwrap();
        txn.rollback();

        let reader = manager.begin();
        assert!(matches!(reader.get_value(table.id, rows[0], 1), Err(TxnError::NotFound)));
    }

    #[test]
    fn commit_respects_a_pre_cancelled_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t5");

        let txn = manager.begin();
        txn.append(table.id, batch(&[(1, 1)])).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = txn.commit(&cancel).unwrap_err();
        assert!(matches!(err, TxnError::Cancelled(_)));
    }

    #[test]
    fn batch_dedup_sees_committed_and_own_staged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let table = setup_table(&manager, "t6");
        let cancel = CancelToken::new();

        let writer = manager.begin();
        writer.append(table.id, batch(&[(1, 10)])).unwrap();
        writer.commit(&cancel).unwrap();

        let txn = manager.begin();
        let err = txn.batch_dedup(table.id, &[Value::I64(1)]).unwrap_err();
        assert!(matches!(err, TxnError::Duplicate(_)));
        assert!(txn.batch_dedup(table.id, &[Value::I64(2)]).is_ok());
    }

    #[test]
    fn append_batch_overflowing_one_object_spills_into_a_second_without_losing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new());
        let driver: Arc<dyn Driver> = Arc::new(tae_durability::LocalDriver::open(dir.path()).unwrap());
        let tso = Arc::new(TsoAllocator::new(Timestamp::MIN));
        let config = TxnConfig {
            block_max_rows: 4,
            object_max_blocks: 2,
            wal_max_message_size: 1 << 20,
        };
        let manager = TxnManager::new(catalog, driver, tso, config);
        let table = setup_table(&manager, "t7");
        let cancel = CancelToken::new();

        let rows: Vec<(i64, i64)> = (0..12).map(|i| (i, i * 10)).collect();
        let txn = manager.begin();
        let row_ids = txn.append(table.id, batch(&rows)).unwrap();
        assert_eq!(row_ids.len(), 12, "every row of the batch must be staged, not just the first object's worth");
        txn.commit(&cancel).unwrap();

        let reader = manager.begin();
        for (k, v) in &rows {
            let row = reader.get_by_filter(table.id, &Value::I64(*k)).unwrap();
            let (value, _) = reader.get_value(table.id, row, 1).unwrap();
            assert_eq!(value, Value::I64(*v));
        }
    }
}
