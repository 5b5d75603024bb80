use std::sync::Arc;

use tae_primitives::{Batch, CancelToken, TableId, Timestamp, TxnId};
use tae_txn::TxnManager;

use crate::error::{Result, TaeError};

/// A read-only query shim: a reader timestamp bound to a live `TxnManager`,
/// letting a caller run read-only column scans without opening a full
/// read-write [`tae_txn::Txn`].
pub struct Snapshot {
    manager: Arc<TxnManager>,
    reader_ts: Timestamp,
    txn: Option<TxnId>,
}

impl Snapshot {
    pub fn new(manager: Arc<TxnManager>, reader_ts: Timestamp) -> Self {
        Snapshot { manager, reader_ts, txn: None }
    }

    /// A snapshot pinned to the engine's current watermark, equivalent to
    /// what a freshly begun `Txn` would see.
    pub fn latest(manager: Arc<TxnManager>) -> Self {
        let ts = manager.current_ts();
        Snapshot::new(manager, ts)
    }

    /// A snapshot reading as of `txn`'s own in-flight writes in addition to
    /// whatever was committed at `reader_ts` — used by callers that need to
    /// see their own uncommitted appends/deletes, mirroring `Txn`'s own
    /// `Some(self.id)` passed to every `TableStore` read method.
    pub fn with_own_txn(mut self, txn: TxnId) -> Self {
        self.txn = Some(txn);
        self
    }

    pub fn reader_ts(&self) -> Timestamp {
        self.reader_ts
    }

    /// Reads every live object of `table`, zone-map/bloom-pruned and
    /// tombstone-filtered by the underlying `TableStore::scan`, restricted
    /// to `col_idxes`.
    pub fn scan(&self, table_id: TableId, col_idxes: &[usize], cancel: &CancelToken) -> Result<Batch> {
        let runtime = self
            .manager
            .table_runtimes()
            .into_iter()
            .find(|r| r.table_id == table_id)
            .ok_or(TaeError::Corruption(format!("snapshot: unknown table {table_id:?}")))?;
        Ok(runtime.store.scan(self.reader_ts, self.txn, col_idxes, cancel)?)
    }

    /// Scans every column of `table` in schema order.
    pub fn scan_all(&self, table_id: TableId, cancel: &CancelToken) -> Result<Batch> {
        let runtime = self
            .manager
            .table_runtimes()
            .into_iter()
            .find(|r| r.table_id == table_id)
            .ok_or(TaeError::Corruption(format!("snapshot: unknown table {table_id:?}")))?;
        let col_idxes: Vec<usize> = (0..runtime.store.schema().columns.len()).collect();
        Ok(runtime.store.scan(self.reader_ts, self.txn, &col_idxes, cancel)?)
    }
}
