use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use tae_catalog::{EntryState, ObjectKind};
use tae_mvcc::ChainStore;
use tae_primitives::{Batch, CancelToken, ObjectId, Timestamp, TxnId};
use tae_storage::{MemoryNode, NodeT, PersistedNode};
use tae_txn::{TableRuntime, TxnManager};

use crate::candidate::{ObjectCandidate, TaskHost};
use crate::error::Result;
use crate::remote::{MergeDescriptor, RemoteDispatcher};
use crate::tracker::ActiveMergeTracker;
use crate::MergePlan;

/// Tenant/user/role context attached to every merge-task descriptor sent to
/// a remote compute node. This engine does not otherwise model
/// authentication or tenancy; the scheduler just threads these strings
/// through untouched.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    pub tenant: String,
    pub user: String,
    pub role: String,
}

/// Collects every non-appendable, committed object of `runtime` as a merge
/// candidate. The current appendable object is never a candidate — it's
/// still accepting writes.
pub fn collect_candidates(runtime: &TableRuntime) -> Vec<ObjectCandidate> {
    runtime
        .table
        .objects
        .read()
        .iter()
        .filter(|o| *o.kind.read() == ObjectKind::NonAppendable && *o.state.read() == EntryState::Committed)
        .map(|o| ObjectCandidate {
            table_id: runtime.table_id,
            db_id: runtime.db_id,
            object_id: o.id,
            row_count: o.stats.row_count.load(Ordering::SeqCst) as u64,
            byte_size: o.stats.byte_size.load(Ordering::SeqCst),
            is_tombstone: o.is_tombstone,
        })
        .collect()
}

/// Reads every input object's rows, builds the merged object, and commits
/// the catalog/WAL side-effects through [`TxnManager::commit_merge`]: reads
/// the objects, writes a merged object, and then inside a new transaction
/// soft-deletes the inputs and registers the output. Only `runtime.store`
/// is mutated after `commit_merge` succeeds, so a failure here — at any
/// stage — never needs an explicit rollback: the inputs were never touched.
pub fn run_local_merge(manager: &Arc<TxnManager>, runtime: &TableRuntime, plan: &MergePlan, cancel: &CancelToken) -> Result<ObjectId> {
    let schema = runtime.store.schema().clone();
    let col_idxes: Vec<usize> = (0..schema.columns.len()).collect();

    let mut merged = Batch {
        columns: col_idxes.iter().map(|_| Vec::new()).collect(),
    };
    for input in &plan.inputs {
        cancel.check()?;
        let Some(node) = runtime.store.object(input.object_id) else {
            continue;
        };
        let partial = node.current().scan(Timestamp::MAX, None, &col_idxes);
        for (col, part) in merged.columns.iter_mut().zip(partial.columns) {
            col.extend(part);
        }
    }

    let output_id = ObjectId::new_random();
    let chain_store = Arc::new(ChainStore::new());
    let memory = MemoryNode::new(output_id, schema, chain_store);
    // `block_max_rows` still governs block layout, for zone-map/bloom
    // granularity, but a merge's output is written straight to its
    // persisted form and never appended to again, so it isn't bound by
    // `object_max_blocks` the way a live appendable object is.
    let block_max_rows = manager.config().block_max_rows;
    memory.append(merged, Timestamp::MAX, TxnId(0), block_max_rows, u16::MAX);
    let persisted = Arc::new(PersistedNode::freeze(&memory, runtime.object_store.clone(), false)?);

    let input_ids: Vec<ObjectId> = plan.inputs.iter().map(|c| c.object_id).collect();
    manager.commit_merge(plan.table_id, output_id, &input_ids, cancel)?;

    runtime.store.register_persisted(output_id, persisted);
    for id in &input_ids {
        runtime.store.retire(*id);
    }
    Ok(output_id)
}

enum Job {
    Merge(MergePlan),
    Shutdown,
}

/// Drives periodic scheduling cycles and a fixed pool of worker threads
/// executing local merge tasks over a `crossbeam-channel`-backed queue.
pub struct MergeScheduler {
    manager: Arc<TxnManager>,
    tracker: Arc<ActiveMergeTracker>,
    remote: Arc<dyn RemoteDispatcher>,
    tx: crossbeam_channel::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl MergeScheduler {
    pub fn new(manager: Arc<TxnManager>, remote: Arc<dyn RemoteDispatcher>, worker_count: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let tracker = Arc::new(ActiveMergeTracker::new());
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count.max(1) {
            let rx = rx.clone();
            let manager = manager.clone();
            let tracker = tracker.clone();
            let worker = std::thread::Builder::new()
                .name(format!("tae-merge-{i}"))
                .spawn(move || {
                    for job in rx {
                        let Job::Merge(plan) = job else { break };
                        let cancel = CancelToken::new();
                        let input_ids: Vec<ObjectId> = plan.inputs.iter().map(|c| c.object_id).collect();
                        let Some(runtime) = manager.table_runtimes().into_iter().find(|r| r.table_id == plan.table_id) else {
                            tracker.release(&input_ids);
                            continue;
                        };
                        if let Err(e) = run_local_merge(&manager, &runtime, &plan, &cancel) {
                            log::warn!("local merge of table {:?} failed, inputs stay live: {e}", plan.table_id);
                        }
                        tracker.release(&input_ids);
                    }
                })
                .expect("failed to spawn merge worker thread");
            workers.push(worker);
        }
        MergeScheduler {
            manager,
            tracker,
            remote,
            tx,
            workers,
        }
    }

    /// One scheduling pass over every registered table. Local plans are
    /// handed to the worker pool; remote plans are
    /// dispatched inline and, on failure, released immediately so they are
    /// reconsidered on the next cycle ("remote errors log and retry on the
    /// next cycle").
    pub fn run_cycle(&self, budget: &crate::candidate::MergeBudget, ctx: &MergeContext) {
        for runtime in self.manager.table_runtimes() {
            let candidates = collect_candidates(&runtime);
            if candidates.is_empty() {
                continue;
            }
            let Some(plan) = crate::candidate::choose_merge(&candidates, budget, &self.tracker) else {
                continue;
            };
            let input_ids: Vec<ObjectId> = plan.inputs.iter().map(|c| c.object_id).collect();
            self.tracker.mark_active(&input_ids);
            match plan.host {
                TaskHost::Local => {
                    if self.tx.send(Job::Merge(plan)).is_err() {
                        self.tracker.release(&input_ids);
                    }
                }
                TaskHost::Remote => {
                    let descriptor = MergeDescriptor {
                        tenant: ctx.tenant.clone(),
                        user: ctx.user.clone(),
                        role: ctx.role.clone(),
                        db_id: plan.db_id,
                        table_id: plan.table_id,
                        inputs: plan.inputs.clone(),
                        estimated_memory_bytes: plan.estimated_memory_bytes,
                    };
                    if let Err(e) = self.remote.dispatch(&descriptor) {
                        log::warn!("remote merge dispatch for table {:?} failed, will retry: {e}", plan.table_id);
                        self.tracker.release(&input_ids);
                    }
                }
            }
        }
    }

    pub fn shutdown(self) {
        for _ in &self.workers {
            let _ = self.tx.send(Job::Shutdown);
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}
