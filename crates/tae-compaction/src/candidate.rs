use tae_primitives::{DbId, ObjectId, TableId};

use crate::tracker::ActiveMergeTracker;

/// One object the scheduler could fold into a merge, scored from the
/// catalog's object stats: per-object row count, per-object byte size, and
/// whether the object is a tombstone or data object.
#[derive(Debug, Clone)]
pub struct ObjectCandidate {
    pub table_id: TableId,
    pub db_id: DbId,
    pub object_id: ObjectId,
    pub row_count: u64,
    pub byte_size: u64,
    pub is_tombstone: bool,
}

/// Resource snapshot the scheduler weighs a merge against: current CPU
/// percentage and available memory bytes. `spare_fraction` is the
/// `merge_memory_spare_fraction` config option (default 0.15): the slice of
/// `total_memory_bytes` merges are never allowed to touch.
#[derive(Debug, Clone, Copy)]
pub struct MergeBudget {
    pub cpu_percent: f64,
    pub total_memory_bytes: u64,
    pub spare_fraction: f64,
}

impl MergeBudget {
    pub fn available_memory_bytes(&self) -> u64 {
        let spare = (self.total_memory_bytes as f64 * self.spare_fraction) as u64;
        self.total_memory_bytes.saturating_sub(spare)
    }
}

/// Where a chosen merge plan's task runs: local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHost {
    Local,
    Remote,
}

/// CPU load above which the scheduler prefers offloading a merge to a
/// remote compute node over running it on this process's own worker pool.
/// 80% mirrors the same "estimate, then reject if too costly" treatment
/// applied to memory.
pub const REMOTE_CPU_THRESHOLD_PERCENT: f64 = 80.0;

/// A scored decision: which objects to merge, where to run the task, and
/// the memory it is expected to cost.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub table_id: TableId,
    pub db_id: DbId,
    pub inputs: Vec<ObjectCandidate>,
    pub host: TaskHost,
    pub estimated_memory_bytes: u64,
}

/// The merge policy: checks no candidate is already in an active merge,
/// estimates the cost of merging every remaining eligible candidate, and
/// rejects if that estimate exceeds two thirds of the budget's available
/// memory. Needs at least two surviving, non-tombstone candidates — merging
/// one object into itself is pointless.
pub fn choose_merge(candidates: &[ObjectCandidate], budget: &MergeBudget, active: &ActiveMergeTracker) -> Option<MergePlan> {
    let table_id = candidates.first()?.table_id;
    let db_id = candidates.first()?.db_id;
    let eligible: Vec<ObjectCandidate> = candidates
        .iter()
        .filter(|c| !c.is_tombstone && !active.is_active(c.object_id))
        .cloned()
        .collect();
    if eligible.len() < 2 {
        return None;
    }
    let estimated_memory_bytes: u64 = eligible.iter().map(|c| c.byte_size).sum();
    let ceiling = budget.available_memory_bytes().saturating_mul(2) / 3;
    if estimated_memory_bytes > ceiling {
        return None;
    }
    let host = if budget.cpu_percent >= REMOTE_CPU_THRESHOLD_PERCENT {
        TaskHost::Remote
    } else {
        TaskHost::Local
    };
    Some(MergePlan {
        table_id,
        db_id,
        inputs: eligible,
        host,
        estimated_memory_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u8, byte_size: u64, is_tombstone: bool) -> ObjectCandidate {
        ObjectCandidate {
            table_id: TableId(1),
            db_id: DbId(1),
            object_id: ObjectId::from_counter(id as u64),
            row_count: byte_size,
            byte_size,
            is_tombstone,
        }
    }

    fn budget(cpu_percent: f64) -> MergeBudget {
        MergeBudget {
            cpu_percent,
            total_memory_bytes: 1_000_000,
            spare_fraction: 0.15,
        }
    }

    #[test]
    fn rejects_single_candidate() {
        let tracker = ActiveMergeTracker::new();
        let candidates = vec![candidate(1, 100, false)];
        assert!(choose_merge(&candidates, &budget(10.0), &tracker).is_none());
    }

    #[test]
    fn excludes_tombstones_and_already_active_objects() {
        let tracker = ActiveMergeTracker::new();
        let active_id = ObjectId::from_counter(2);
        tracker.mark_active(&[active_id]);
        let candidates = vec![
            candidate(1, 100, false),
            ObjectCandidate {
                object_id: active_id,
                ..candidate(2, 100, false)
            },
            candidate(3, 100, true),
            candidate(4, 100, false),
        ];
        let plan = choose_merge(&candidates, &budget(10.0), &tracker).unwrap();
        assert_eq!(plan.inputs.len(), 2);
        assert!(plan.inputs.iter().all(|c| c.object_id != active_id));
    }

    #[test]
    fn rejects_when_estimated_memory_exceeds_two_thirds_of_available() {
        let tracker = ActiveMergeTracker::new();
        let candidates = vec![candidate(1, 500_000, false), candidate(2, 500_000, false)];
        assert!(choose_merge(&candidates, &budget(10.0), &tracker).is_none());
    }

    #[test]
    fn prefers_remote_host_under_high_cpu_load() {
        let tracker = ActiveMergeTracker::new();
        let candidates = vec![candidate(1, 10, false), candidate(2, 10, false)];
        let plan = choose_merge(&candidates, &budget(95.0), &tracker).unwrap();
        assert_eq!(plan.host, TaskHost::Remote);
    }
}
