use std::sync::Arc;

use parking_lot::Mutex;
use tae_data_structures::DeleteBitmap;
use tae_primitives::{BlockId, Timestamp, TxnId};

use crate::error::{MvccError, Result};
use crate::node::{AppendNode, DeleteNode};

/// Notified when an append node commits, so the owning table can keep its
/// row counter current.
pub trait AppendListener: Send + Sync {
    fn on_append_committed(&self, rows: u32, is_tombstone: bool);
}

impl AppendListener for () {
    fn on_append_committed(&self, _rows: u32, _is_tombstone: bool) {}
}

struct Chains {
    appends: Vec<Arc<AppendNode>>,
    deletes: Vec<Arc<DeleteNode>>,
}

/// The authoritative append and delete chains for one block, behind a
/// single per-block mutex protecting both chains.
pub struct BlockMvcc {
    pub block: BlockId,
    chains: Mutex<Chains>,
}

impl BlockMvcc {
    pub fn new(block: BlockId) -> Self {
        BlockMvcc {
            block,
            chains: Mutex::new(Chains {
                appends: Vec::new(),
                deletes: Vec::new(),
            }),
        }
    }

    /// Appends a new node to the tail, enforcing the contiguity invariant:
    /// `startRow` of node n+1 equals `maxRow` of node n, `startRow` of node
    /// 0 is 0.
    pub fn push_append(&self, node: Arc<AppendNode>) -> Result<()> {
        let mut chains = self.chains.lock();
        let expected = chains.appends.last().map_or(0, |n| n.max_row);
        if node.start_row != expected {
            log::warn!(
                "block {}: rejecting append at start_row {} (expected {expected})",
                self.block,
                node.start_row
            );
            return Err(MvccError::NonContiguousAppend {
                block: self.block,
                start_row: node.start_row,
                expected,
            });
        }
        chains.appends.push(node);
        Ok(())
    }

    /// Replays an append node recorded during a prior run. Idempotent: a
    /// node already present at the same `start_row` is a no-op. Returns
    /// whether the node was newly inserted, so a caller rebuilding row data
    /// alongside the chain (the facade's replay pipeline) knows whether to
    /// materialize the rows or skip them as already present.
    pub fn replay_append(&self, node: Arc<AppendNode>) -> Result<bool> {
        let mut chains = self.chains.lock();
        if chains.appends.iter().any(|n| n.start_row == node.start_row) {
            return Ok(false);
        }
        let expected = chains.appends.last().map_or(0, |n| n.max_row);
        if node.start_row != expected {
            return Err(MvccError::NonContiguousAppend {
                block: self.block,
                start_row: node.start_row,
                expected,
            });
        }
        chains.appends.push(node);
        Ok(true)
    }

    pub fn push_delete(&self, node: Arc<DeleteNode>) {
        self.chains.lock().deletes.push(node);
    }

    /// Replays a delete node recorded during a prior run. Idempotent: a
    /// delete already present at the same `commit_ts` is a no-op, mirroring
    /// `replay_append`. Unlike appends, deletes carry no position to key
    /// on, so `commit_ts` is the only signal a re-delivered WAL entry gives
    /// us.
    pub fn replay_delete(&self, node: Arc<DeleteNode>) {
        let mut chains = self.chains.lock();
        let commit_ts = node.commit_ts();
        if chains.deletes.iter().any(|n| n.commit_ts() == commit_ts) {
            return;
        }
        chains.deletes.push(node);
    }

    /// `maxVisibleRow(ts)` = largest `maxRow` over visible nodes.
    pub fn max_visible_row(&self, ts: Timestamp, reader_txn: Option<TxnId>) -> u32 {
        self.chains
            .lock()
            .appends
            .iter()
            .filter(|n| n.is_visible_to(ts, reader_txn))
            .map(|n| n.max_row)
            .max()
            .unwrap_or(0)
    }

    /// Whether `row_offset` falls within some append node's range that is
    /// visible to `(ts, reader_txn)` — i.e. the row itself has been
    /// appended-and-is-visible, independent of any delete.
    pub fn is_row_visible(&self, row_offset: u32, ts: Timestamp, reader_txn: Option<TxnId>) -> bool {
        self.chains
            .lock()
            .appends
            .iter()
            .any(|n| row_offset >= n.start_row && row_offset < n.max_row && n.is_visible_to(ts, reader_txn))
    }

    /// A row is deleted at `ts` iff any visible, non-aborted delete node's
    /// bitmap contains it.
    pub fn is_deleted(&self, ts: Timestamp, reader_txn: Option<TxnId>, row_offset: u32) -> bool {
        self.chains
            .lock()
            .deletes
            .iter()
            .any(|d| d.is_visible_to(ts, reader_txn) && d.contains(row_offset))
    }

    /// Commits every append node in `[from_row, to_row)` at `commit_ts` and
    /// fires the listener for newly-visible rows.
    pub fn commit_appends_in_range(&self, from_row: u32, to_row: u32, commit_ts: Timestamp, listener: &dyn AppendListener) {
        let chains = self.chains.lock();
        for node in chains.appends.iter() {
            if node.start_row >= from_row && node.max_row <= to_row && node.commit_ts() == Timestamp::UNCOMMITTED {
                node.commit(commit_ts);
                listener.on_append_committed(node.rows(), node.is_tombstone);
            }
        }
    }

    pub fn commit_deletes(&self, commit_ts: Timestamp) {
        let chains = self.chains.lock();
        for node in chains.deletes.iter() {
            if node.commit_ts() == Timestamp::UNCOMMITTED {
                node.commit(commit_ts);
            }
        }
    }

    pub fn append_count(&self) -> usize {
        self.chains.lock().appends.len()
    }

    pub fn delete_count(&self) -> usize {
        self.chains.lock().deletes.len()
    }

    /// Whether some other, already-committed delete overlaps `bitmap`:
    /// two concurrent deletes racing on the same row are a W-W conflict,
    /// the same as two concurrent inserts of the same key.
    pub fn has_conflicting_delete(&self, bitmap: &DeleteBitmap, self_txn: TxnId) -> bool {
        let chains = self.chains.lock();
        chains.deletes.iter().any(|d| {
            d.creator_txn != Some(self_txn) && d.is_visible_to(Timestamp::MAX, None) && bitmap.iter().any(|ro| d.contains(ro))
        })
    }

    /// Marks every node created by `txn` as aborted, so it stops being
    /// visible even to its own (now rolled-back) transaction.
    pub fn abort_txn(&self, txn: TxnId) {
        let chains = self.chains.lock();
        for node in chains.appends.iter().filter(|n| n.creator_txn == Some(txn)) {
            node.abort();
        }
        for node in chains.deletes.iter().filter(|n| n.creator_txn == Some(txn)) {
            node.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tae_data_structures::DeleteBitmap;
    use tae_primitives::ObjectId;

    fn block() -> BlockId {
        BlockId::new(ObjectId::from_counter(1), 0)
    }

    #[test]
    fn contiguity_is_enforced() {
        let chain = BlockMvcc::new(block());
        chain
            .push_append(Arc::new(AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, None)))
            .unwrap();
        let err = chain
            .push_append(Arc::new(AppendNode::new(block(), 20, 30, Timestamp::new(2, 0), false, None)))
            .unwrap_err();
        assert!(matches!(err, MvccError::NonContiguousAppend { .. }));
    }

    #[test]
    fn max_visible_row_ignores_uncommitted_tail() {
        let chain = BlockMvcc::new(block());
        let a = Arc::new(AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, None));
        a.commit(Timestamp::new(5, 0));
        chain.push_append(a).unwrap();
        let b = Arc::new(AppendNode::new(block(), 10, 20, Timestamp::new(6, 0), false, None));
        chain.push_append(b).unwrap();
        assert_eq!(chain.max_visible_row(Timestamp::new(100, 0), None), 10);
    }

    #[test]
    fn deleted_row_is_reported_once_delete_commits() {
        let chain = BlockMvcc::new(block());
        let mut bitmap = DeleteBitmap::default();
        bitmap.set(3);
        let d = Arc::new(DeleteNode::new(block(), bitmap, vec![], None));
        d.commit(Timestamp::new(5, 0));
        chain.push_delete(d);
        assert!(chain.is_deleted(Timestamp::new(10, 0), None, 3));
        assert!(!chain.is_deleted(Timestamp::new(10, 0), None, 4));
    }

    #[test]
    fn is_row_visible_respects_append_commit_state() {
        let chain = BlockMvcc::new(block());
        let node = Arc::new(AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, Some(TxnId(1))));
        chain.push_append(node.clone()).unwrap();
        assert!(!chain.is_row_visible(3, Timestamp::new(100, 0), None));
        assert!(chain.is_row_visible(3, Timestamp::new(100, 0), Some(TxnId(1))));
        node.commit(Timestamp::new(5, 0));
        assert!(chain.is_row_visible(3, Timestamp::new(100, 0), None));
        assert!(!chain.is_row_visible(20, Timestamp::new(100, 0), None));
    }

    #[test]
    fn replay_append_is_idempotent() {
        let chain = BlockMvcc::new(block());
        let node = Arc::new(AppendNode::new_committed(block(), 0, 10, Timestamp::new(1, 0), false));
        assert!(chain.replay_append(node.clone()).unwrap());
        assert!(!chain.replay_append(node).unwrap());
        assert_eq!(chain.append_count(), 1);
    }

    #[test]
    fn replay_delete_is_idempotent() {
        let chain = BlockMvcc::new(block());
        let mut bitmap = DeleteBitmap::default();
        bitmap.set(3);
        let node = Arc::new(DeleteNode::new_committed(block(), bitmap, Timestamp::new(5, 0)));
        chain.replay_delete(node.clone());
        chain.replay_delete(node);
        assert_eq!(chain.delete_count(), 1);
    }

    #[test]
    fn conflicting_delete_from_another_committed_txn_is_detected() {
        let chain = BlockMvcc::new(block());
        let mut bitmap = DeleteBitmap::default();
        bitmap.set(3);
        let other = Arc::new(DeleteNode::new(block(), bitmap.clone(), vec![], Some(TxnId(1))));
        other.commit(Timestamp::new(5, 0));
        chain.push_delete(other);
        assert!(chain.has_conflicting_delete(&bitmap, TxnId(2)));
        assert!(!chain.has_conflicting_delete(&bitmap, TxnId(1)));
    }

    #[test]
    fn abort_txn_hides_its_own_uncommitted_writes() {
        let chain = BlockMvcc::new(block());
        let node = Arc::new(AppendNode::new(block(), 0, 10, Timestamp::new(1, 0), false, Some(TxnId(1))));
        chain.push_append(node).unwrap();
        assert!(chain.is_row_visible(0, Timestamp::new(100, 0), Some(TxnId(1))));
        chain.abort_txn(TxnId(1));
        assert!(!chain.is_row_visible(0, Timestamp::new(100, 0), Some(TxnId(1))));
    }
}
