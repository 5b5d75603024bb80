use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tae_data_structures::DeleteBitmap;
use tae_primitives::{BlockId, Timestamp, TxnId, Value};

/// One committed-or-uncommitted append within a block. Mutable only by its
/// creator until commit, at which point `commit_ts` is published and the
/// node becomes immutable in practice (nothing mutates it again save
/// `abort`).
pub struct AppendNode {
    pub start_row: u32,
    pub max_row: u32,
    pub prepare_ts: Timestamp,
    pub is_tombstone: bool,
    pub block: BlockId,
    pub creator_txn: Option<TxnId>,
    commit_ts: RwLock<Timestamp>,
    aborted: AtomicBool,
}

impl AppendNode {
    pub fn new(block: BlockId, start_row: u32, max_row: u32, prepare_ts: Timestamp, is_tombstone: bool, creator_txn: Option<TxnId>) -> Self {
        AppendNode {
            start_row,
            max_row,
            prepare_ts,
            is_tombstone,
            block,
            creator_txn,
            commit_ts: RwLock::new(Timestamp::UNCOMMITTED),
            aborted: AtomicBool::new(false),
        }
    }

    /// Constructs a node already at a known commit-TS, for replay.
    pub fn new_committed(block: BlockId, start_row: u32, max_row: u32, commit_ts: Timestamp, is_tombstone: bool) -> Self {
        AppendNode {
            start_row,
            max_row,
            prepare_ts: commit_ts,
            is_tombstone,
            block,
            creator_txn: None,
            commit_ts: RwLock::new(commit_ts),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn commit_ts(&self) -> Timestamp {
        *self.commit_ts.read()
    }

    pub fn commit(&self, ts: Timestamp) {
        *self.commit_ts.write() = ts;
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.start_row
    }

    /// An append node is visible iff `commit-TS <= ts` and not aborted.
    /// Own-transaction visibility (reading your own uncommitted writes) is
    /// layered on top by `tae-txn`, which knows the reader's txn id; this
    /// crate only implements the committed-state rule.
    pub fn is_visible(&self, ts: Timestamp) -> bool {
        !self.is_aborted() && self.commit_ts() <= ts
    }

    pub fn is_visible_to(&self, ts: Timestamp, reader_txn: Option<TxnId>) -> bool {
        if self.is_aborted() {
            return false;
        }
        let own = self.creator_txn.is_some() && self.creator_txn == reader_txn;
        own || self.commit_ts() <= ts
    }
}

/// A delete record targeting a block. The target block may live in a
/// different object than the one that created the delete — tombstone
/// collection is cross-object.
pub struct DeleteNode {
    pub block: BlockId,
    pub creator_txn: Option<TxnId>,
    bitmap: RwLock<DeleteBitmap>,
    commit_ts: RwLock<Timestamp>,
    aborted: AtomicBool,
    /// Primary-key values of the deleted rows, kept for dedup audit.
    pub pk: Vec<Value>,
}

impl DeleteNode {
    pub fn new(block: BlockId, bitmap: DeleteBitmap, pk: Vec<Value>, creator_txn: Option<TxnId>) -> Self {
        DeleteNode {
            block,
            creator_txn,
            bitmap: RwLock::new(bitmap),
            commit_ts: RwLock::new(Timestamp::UNCOMMITTED),
            aborted: AtomicBool::new(false),
            pk,
        }
    }

    pub fn new_committed(block: BlockId, bitmap: DeleteBitmap, commit_ts: Timestamp) -> Self {
        DeleteNode {
            block,
            creator_txn: None,
            bitmap: RwLock::new(bitmap),
            commit_ts: RwLock::new(commit_ts),
            aborted: AtomicBool::new(false),
            pk: Vec::new(),
        }
    }

    pub fn commit_ts(&self) -> Timestamp {
        *self.commit_ts.read()
    }

    pub fn commit(&self, ts: Timestamp) {
        *self.commit_ts.write() = ts;
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn contains(&self, row_offset: u32) -> bool {
        self.bitmap.read().contains(row_offset)
    }

    /// Deletes by the same transaction are always visible to that
    /// transaction.
    pub fn is_visible_to(&self, ts: Timestamp, reader_txn: Option<TxnId>) -> bool {
        if self.is_aborted() {
            return false;
        }
        let own = self.creator_txn.is_some() && self.creator_txn == reader_txn;
        own || self.commit_ts() <= ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_primitives::ObjectId;

    fn block() -> BlockId {
        BlockId::new(ObjectId::from_counter(1), 0)
    }

    #[test]
    fn uncommitted_append_is_invisible_to_other_readers() {
        let node = AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, Some(TxnId(1)));
        assert!(!node.is_visible(Timestamp::new(100, 0)));
        assert!(node.is_visible_to(Timestamp::new(100, 0), Some(TxnId(1))));
        assert!(!node.is_visible_to(Timestamp::new(100, 0), Some(TxnId(2))));
    }

    #[test]
    fn committed_append_is_visible_at_or_after_commit_ts() {
        let node = AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, None);
        node.commit(Timestamp::new(5, 0));
        assert!(!node.is_visible(Timestamp::new(4, 0)));
        assert!(node.is_visible(Timestamp::new(5, 0)));
        assert!(node.is_visible(Timestamp::new(6, 0)));
    }

    #[test]
    fn aborted_append_is_never_visible() {
        let node = AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, None);
        node.commit(Timestamp::new(5, 0));
        node.abort();
        assert!(!node.is_visible(Timestamp::new(100, 0)));
    }

    #[test]
    fn delete_node_own_txn_visibility() {
        let node = DeleteNode::new(block(), DeleteBitmap::default(), vec![], Some(TxnId(1)));
        assert!(node.is_visible_to(Timestamp::new(0, 0), Some(TxnId(1))));
        assert!(!node.is_visible_to(Timestamp::new(0, 0), Some(TxnId(2))));
    }
}
