//! Facade crate: wires the catalog, transaction store, durability driver,
//! and merge scheduler into one embeddable engine.
//!
//! One struct owns the catalog, the transaction datastore, and the
//! durability handle, opening by replaying the message log forward before
//! accepting writes, plus the background compaction thread wiring.

pub mod config;
mod error;
mod listener;
pub mod metrics;
mod replay;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tae_catalog::{Catalog, DbEntry, TableEntry};
use tae_compaction::{LoggingRemoteDispatcher, MergeContext, MergeScheduler, RemoteDispatcher};
use tae_durability::{Driver, LocalDriver};
use tae_primitives::{CancelToken, ObjectId, Schema, TableId, Timestamp, TsoAllocator};
use tae_storage::InMemoryObjectStore;
use tae_txn::{Txn, TxnManager};

pub use config::Config;
pub use error::{Result, TaeError};
pub use listener::TableRowCounter;
pub use metrics::Metrics;
pub use snapshot::Snapshot;

/// A database directory open for reads and writes. Owns the catalog, the
/// transaction manager (and through it every registered table's storage
/// runtime), the durability driver, and an optionally started merge
/// scheduler.
///
/// `--table` addressing throughout this crate and `tae-cli` is by numeric
/// `TableId`, matching the catalog's own `TableEntry` (a table entry
/// carries no name field, only `id`); `--db` addressing is by name, since
/// `DbEntry` has always carried one.
pub struct Engine {
    catalog: Arc<Catalog>,
    driver: Arc<dyn Driver>,
    tso: Arc<TsoAllocator>,
    txn_manager: Arc<TxnManager>,
    config: Config,
    metrics: Arc<Metrics>,
    scheduler: Mutex<Option<MergeScheduler>>,
}

impl Engine {
    /// Opens (or creates) a database directory, replaying its WAL forward
    /// before returning. No merge scheduler is started — call
    /// [`Engine::start_compaction`] once the embedder is ready to pay for
    /// background worker threads.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::open(dir)?);
        let catalog = Arc::new(Catalog::new());
        let tso = Arc::new(TsoAllocator::new(Timestamp::MIN));
        let txn_manager = TxnManager::new(catalog.clone(), driver.clone(), tso.clone(), config.txn_config());

        replay::replay(&txn_manager, &driver, &tso)?;

        let metrics = Arc::new(Metrics::new());
        metrics.open_tables.set(txn_manager.table_runtimes().len() as i64);

        Ok(Engine {
            catalog,
            driver,
            tso,
            txn_manager,
            config,
            metrics,
            scheduler: Mutex::new(None),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives a caller (the CLI, or an embedder's own compaction driver)
    /// direct access to the transaction manager for operations this facade
    /// doesn't otherwise wrap one-to-one.
    pub fn txn_manager(&self) -> &Arc<TxnManager> {
        &self.txn_manager
    }

    pub fn create_database(&self, name: impl Into<String>, cancel: &CancelToken) -> Result<Arc<DbEntry>> {
        Ok(self.txn_manager.create_database(name, cancel)?)
    }

    pub fn database(&self, name: &str) -> Result<Arc<DbEntry>> {
        let reader = tae_catalog::Snapshot(self.txn_manager.current_ts());
        Ok(self.catalog.get_database_by_name(name, &reader)?)
    }

    /// Creates a table and immediately registers its storage runtime, so
    /// it's ready to accept transactions the moment this call returns —
    /// bridging the split between the catalog tree and the transaction
    /// store's per-table runtime state.
    pub fn create_table(&self, db: &Arc<DbEntry>, schema: Schema, cancel: &CancelToken) -> Result<Arc<TableEntry>> {
        let table = self.txn_manager.create_table(db, schema, cancel)?;
        let listener = Arc::new(TableRowCounter(table.clone()));
        let object_store = Arc::new(InMemoryObjectStore::new());
        self.txn_manager.register_table(table.clone(), db.id, object_store, listener);
        self.metrics.open_tables.set(self.txn_manager.table_runtimes().len() as i64);
        Ok(table)
    }

    pub fn begin(&self) -> Txn {
        self.txn_manager.begin()
    }

    pub fn commit(&self, txn: Txn, cancel: &CancelToken) -> Result<Timestamp> {
        match txn.commit(cancel) {
            Ok(ts) => {
                self.metrics.txns_committed_total.inc();
                Ok(ts)
            }
            Err(e) => {
                self.metrics.txns_rolled_back_total.inc();
                Err(e.into())
            }
        }
    }

    pub fn rollback(&self, txn: Txn) {
        txn.rollback();
        self.metrics.txns_rolled_back_total.inc();
    }

    /// A read-only snapshot pinned to the engine's current watermark.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::latest(self.txn_manager.clone())
    }

    /// Forces the named table's current appendable object to freeze now,
    /// regardless of how full its last block is. Returns the frozen
    /// object's id, or `None` if the table had no in-progress appendable
    /// object to freeze.
    pub fn force_flush(&self, table_id: TableId) -> Result<Option<ObjectId>> {
        let runtime = self
            .txn_manager
            .table_runtimes()
            .into_iter()
            .find(|r| r.table_id == table_id)
            .ok_or_else(|| TaeError::Corruption(format!("force-flush: unknown table {table_id:?}")))?;
        let frozen = runtime.store.freeze_current(runtime.object_store.clone(), false)?;
        if frozen.is_some() {
            self.metrics.objects_frozen_total.inc();
        }
        Ok(frozen)
    }

    /// Starts the merge scheduler's fixed worker pool. A previously started
    /// scheduler is shut down first. Passing `None` for `remote` falls back
    /// to [`LoggingRemoteDispatcher`], the same stand-in `tae-compaction`
    /// itself defaults to in its own tests.
    pub fn start_compaction(&self, remote: Option<Arc<dyn RemoteDispatcher>>, worker_count: usize) {
        let remote = remote.unwrap_or_else(|| Arc::new(LoggingRemoteDispatcher));
        let scheduler = MergeScheduler::new(self.txn_manager.clone(), remote, worker_count);
        let mut slot = self.scheduler.lock();
        if let Some(previous) = slot.take() {
            previous.shutdown();
        }
        *slot = Some(scheduler);
    }

    /// Runs one scheduling pass. `cpu_percent` and `total_memory_bytes` are
    /// resource readings the caller supplies: this engine has no opinion on
    /// how they're sampled. A no-op if [`Engine::start_compaction`] was
    /// never called.
    pub fn run_compaction_cycle(&self, cpu_percent: f64, total_memory_bytes: u64, ctx: &MergeContext) {
        let budget = self.config.merge_budget(cpu_percent, total_memory_bytes);
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.run_cycle(&budget, ctx);
            self.metrics.merge_cycles_total.inc();
        }
    }

    pub fn stop_compaction(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
    }

    /// Flushes and closes every log group's writer thread. Callers should
    /// stop compaction first if they don't want in-flight merges racing a
    /// shutdown driver.
    pub fn close(&self) -> Result<()> {
        Ok(self.driver.close()?)
    }
}

#[cfg(test)]
mod tests {
    use tae_primitives::{ColumnSchema, Value};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![ColumnSchema::new("id").pk(), ColumnSchema::new("v")])
    }

    #[test]
    fn open_create_append_commit_and_scan_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), Config::default()).unwrap();
        let cancel = CancelToken::new();

        let db = engine.create_database("d1", &cancel).unwrap();
        let table = engine.create_table(&db, schema(), &cancel).unwrap();

        let txn = engine.begin();
        txn.append(
            table.id,
            tae_primitives::Batch {
                columns: vec![vec![Value::I64(1), Value::I64(2)], vec![Value::I64(10), Value::I64(20)]],
            },
        )
        .unwrap();
        engine.commit(txn, &cancel).unwrap();

        let snapshot = engine.snapshot();
        let batch = snapshot.scan_all(table.id, &cancel).unwrap();
        assert_eq!(batch.columns[0].len(), 2);
        assert_eq!(engine.metrics().txns_committed_total.get(), 1);
    }

    #[test]
    fn force_flush_on_empty_table_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), Config::default()).unwrap();
        let cancel = CancelToken::new();
        let db = engine.create_database("d2", &cancel).unwrap();
        let table = engine.create_table(&db, schema(), &cancel).unwrap();

        let frozen = engine.force_flush(table.id).unwrap();
        assert!(frozen.is_none());
    }

    #[test]
    fn reopening_an_engine_replays_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let table_id;
        {
            let engine = Engine::open(dir.path(), Config::default()).unwrap();
            let cancel = CancelToken::new();
            let db = engine.create_database("d3", &cancel).unwrap();
            let table = engine.create_table(&db, schema(), &cancel).unwrap();
            table_id = table.id;

            let txn = engine.begin();
            txn.append(
                table_id,
                tae_primitives::Batch {
                    columns: vec![vec![Value::I64(1)], vec![Value::I64(100)]],
                },
            )
            .unwrap();
            engine.commit(txn, &cancel).unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(dir.path(), Config::default()).unwrap();
        let snapshot = engine.snapshot();
        let batch = snapshot.scan_all(table_id, &CancelToken::new()).unwrap();
        assert_eq!(batch.columns[0].len(), 1);
    }
}
