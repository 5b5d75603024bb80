use std::collections::HashMap;
use std::sync::Arc;

use tae_catalog::{Catalog, ObjectKind, ReplayCommand, ReplayObserver, TsoObserver};
use tae_durability::{Driver, LogGroup};
use tae_primitives::{DbId, ObjectId, TableId, Timestamp, TsoAllocator};
use tae_storage::{MemoryNode, NodeState, ObjectStore};
use tae_txn::command::{self, ChunkMetadata, WalCommand};
use tae_txn::{TableRuntime, TxnManager, WAL_COMMAND_TYPE_TAG};

use crate::error::{Result, TaeError};
use crate::listener::TableRowCounter;

/// Streams every log group forward from LSN 0 and applies each composed
/// record's commands to the catalog and storage layers. Runs once at
/// `Engine::open`, before any new transaction is admitted.
/// Control-group records carry database/table DDL and the merge scheduler's
/// administrative commits; user-data records carry everything a regular
/// transaction's `PrepareWAL` step produced.
pub fn replay(manager: &Arc<TxnManager>, driver: &Arc<dyn Driver>, tso: &Arc<TsoAllocator>) -> Result<()> {
    let catalog = manager.catalog().clone();
    let observer = TsoObserver(tso);

    for record in read_composed_records(driver.as_ref(), LogGroup::Control)? {
        for cmd in &record.commands {
            apply_control_command(manager, &catalog, cmd, &observer)?;
        }
    }

    for record in read_composed_records(driver.as_ref(), LogGroup::UserData)? {
        let mut freeze_after: Vec<TableId> = Vec::new();
        for cmd in &record.commands {
            apply_user_data_command(manager, &catalog, cmd, &observer, &mut freeze_after)?;
        }
        for table_id in freeze_after {
            let runtime = table_runtime(manager, table_id)?;
            runtime.store.freeze_current(runtime.object_store.clone(), false)?;
        }
    }

    Ok(())
}

/// One fully reassembled transaction's command list, in commit order.
struct ComposedRecord {
    commands: Vec<WalCommand>,
}

/// Reads every entry in a log group, reassembles chunked bodies by
/// `(txn_id, commit_ts)`, and decodes the composed command list — the
/// inverse of `TxnManager::flush_control`/`Txn::prepare_wal`'s chunking.
fn read_composed_records(driver: &dyn Driver, group: LogGroup) -> Result<Vec<ComposedRecord>> {
    let entries = driver.iter_from(group, 0)?;
    let mut pending: HashMap<(u64, Timestamp), Vec<(u32, Vec<u8>)>> = HashMap::new();
    let mut expected_counts: HashMap<(u64, Timestamp), u32> = HashMap::new();
    let mut order: Vec<(u64, Timestamp)> = Vec::new();

    for (lsn, entry) in entries {
        if entry.type_tag != WAL_COMMAND_TYPE_TAG {
            continue;
        }
        let meta: ChunkMetadata = command::decode_chunk_metadata(&entry.metadata)
            .map_err(|e| TaeError::Corruption(format!("lsn {lsn}: bad chunk metadata: {e}")))?;
        let key = (meta.txn_id.0, meta.commit_ts);
        if !pending.contains_key(&key) {
            order.push(key);
        }
        expected_counts.insert(key, meta.chunk_count);
        pending.entry(key).or_default().push((meta.chunk_index, entry.payload));
    }

    let mut records = Vec::with_capacity(order.len());
    for key in order {
        let expected = expected_counts.get(&key).copied().unwrap_or(0);
        let mut chunks = pending.remove(&key).unwrap_or_default();
        if chunks.len() as u32 != expected {
            return Err(TaeError::Corruption(format!(
                "txn {}: expected {expected} WAL chunks, found {}",
                key.0,
                chunks.len()
            )));
        }
        chunks.sort_by_key(|(idx, _)| *idx);
        let mut body = Vec::new();
        for (_, payload) in chunks {
            body.extend_from_slice(&payload);
        }
        let commands = command::decode_body(&body).map_err(|e| TaeError::Corruption(format!("txn {}: {e}", key.0)))?;
        records.push(ComposedRecord { commands });
    }
    Ok(records)
}

fn apply_control_command(manager: &Arc<TxnManager>, catalog: &Arc<Catalog>, cmd: &WalCommand, observer: &TsoObserver) -> Result<()> {
    let WalCommand::Catalog(replay_cmd) = cmd else {
        return Err(TaeError::Corruption("control log group carried a non-catalog command".to_string()));
    };
    catalog.replay_command(replay_cmd, observer)?;
    match replay_cmd {
        ReplayCommand::CreateTable { id, db_id, .. } => register_table_if_absent(manager, catalog, *id, *db_id)?,
        // The only object creations the control group carries are the merge
        // scheduler's outputs (`TxnManager::commit_merge`): already-persisted
        // objects with no corresponding Append/Freeze record, rebuilt from
        // object storage directly rather than replayed from a WAL append.
        ReplayCommand::CreateObject { id, table_id, .. } => register_merge_output(manager, *table_id, *id)?,
        ReplayCommand::DropObject { table_id, id, .. } => {
            let runtime = table_runtime(manager, *table_id)?;
            runtime.store.retire(*id);
        }
        _ => {}
    }
    Ok(())
}

/// Rebuilds a merge output's storage node purely from its persisted blocks
/// (`tae_storage::PersistedNode::reload`), mirroring what
/// `tae_compaction::run_local_merge` did live right after
/// `TxnManager::commit_merge` returned.
fn register_merge_output(manager: &Arc<TxnManager>, table_id: TableId, object_id: ObjectId) -> Result<()> {
    let runtime = table_runtime(manager, table_id)?;
    if runtime.store.object(object_id).is_some() {
        return Ok(());
    }
    let persisted = tae_storage::PersistedNode::reload(object_id, runtime.store.schema().clone(), runtime.object_store.clone())?;
    runtime.store.register_persisted(object_id, Arc::new(persisted));
    Ok(())
}

fn apply_user_data_command(
    manager: &Arc<TxnManager>,
    catalog: &Arc<Catalog>,
    cmd: &WalCommand,
    observer: &TsoObserver,
    freeze_after: &mut Vec<TableId>,
) -> Result<()> {
    match cmd {
        WalCommand::Catalog(replay_cmd) => {
            catalog.replay_command(replay_cmd, observer)?;
            if let ReplayCommand::CreateObject { id, table_id, kind, is_tombstone, .. } = replay_cmd {
                register_object_storage(manager, *table_id, *id, *is_tombstone)?;
                if *kind == ObjectKind::NonAppendable && !is_tombstone && !freeze_after.contains(table_id) {
                    freeze_after.push(*table_id);
                }
            }
            Ok(())
        }
        WalCommand::Append(a) => {
            observer.observe_commit_ts(a.commit_ts);
            let runtime = table_runtime(manager, a.table_id)?;
            let memory = memory_node_for(&runtime, a.block.object);
            memory.replay_append(a.block.block_offset, a.rows.clone(), a.start_row, a.max_row, a.commit_ts, a.is_tombstone)?;
            Ok(())
        }
        WalCommand::Delete(d) => {
            observer.observe_commit_ts(d.commit_ts);
            let runtime = table_runtime(manager, d.table_id)?;
            let chain = runtime.chain_store.get_or_create(d.block);
            let node = Arc::new(tae_mvcc::DeleteNode::new_committed(d.block, d.bitmap.clone(), d.commit_ts));
            chain.replay_delete(node);
            Ok(())
        }
        WalCommand::Freeze(f) => {
            let runtime = table_runtime(manager, f.table_id)?;
            let object_entry = runtime
                .table
                .find_object(f.object)
                .ok_or_else(|| TaeError::Corruption(format!("replay: freeze target object {:?} missing from catalog", f.object)))?;
            object_entry.freeze();
            runtime.store.freeze_current(runtime.object_store.clone(), false)?;
            Ok(())
        }
    }
}

fn register_table_if_absent(manager: &Arc<TxnManager>, catalog: &Arc<Catalog>, table_id: TableId, db_id: DbId) -> Result<()> {
    if manager.table_runtimes().iter().any(|r| r.table_id == table_id) {
        return Ok(());
    }
    let db = catalog.get_database_by_id(db_id)?;
    let table = db
        .find_table(table_id)
        .ok_or_else(|| TaeError::Corruption(format!("replay: table {table_id:?} missing from just-replayed database")))?;
    let listener = Arc::new(TableRowCounter(table.clone()));
    let object_store: Arc<dyn ObjectStore> = Arc::new(tae_storage::InMemoryObjectStore::new());
    manager.register_table(table, db_id, object_store, listener);
    Ok(())
}

/// Lazily opens the storage-layer node for a replayed `CreateObject`
/// record, so a following `Append` has somewhere to land. Tombstone objects
/// are catalog-only bookkeeping in the tombstone-object map's peer tree for
/// delete records — live transactions never open a storage node for one
/// (`Txn::range_delete` records directly on the block's MVCC chain), so
/// replay must not either, or it would hijack the table's single
/// current-appendable slot out from under the object actually receiving
/// rows.
fn register_object_storage(manager: &Arc<TxnManager>, table_id: TableId, object_id: ObjectId, is_tombstone: bool) -> Result<()> {
    if is_tombstone {
        return Ok(());
    }
    let runtime = table_runtime(manager, table_id)?;
    if runtime.store.object(object_id).is_none() {
        runtime.store.open_appendable(object_id);
    }
    Ok(())
}

fn table_runtime(manager: &Arc<TxnManager>, table_id: TableId) -> Result<Arc<TableRuntime>> {
    manager
        .table_runtimes()
        .into_iter()
        .find(|r| r.table_id == table_id)
        .ok_or_else(|| TaeError::Corruption(format!("replay: record referenced unregistered table {table_id:?}")))
}

fn memory_node_for(runtime: &Arc<TableRuntime>, object_id: ObjectId) -> Arc<MemoryNode> {
    if let Some(existing) = runtime.store.object(object_id) {
        if let NodeState::Memory(memory) = existing.current() {
            return memory;
        }
    }
    let node = runtime.store.open_appendable(object_id);
    match node.current() {
        NodeState::Memory(memory) => memory,
        NodeState::Persisted(_) => unreachable!("open_appendable always installs a fresh Memory node"),
    }
}
