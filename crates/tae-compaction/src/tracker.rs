use std::collections::HashSet;

use parking_lot::Mutex;
use tae_primitives::ObjectId;

/// Objects currently committed to some in-flight merge, local or remote.
/// Both task hosts share one set: an object can't be picked twice
/// regardless of which host is already working on it.
#[derive(Default)]
pub struct ActiveMergeTracker {
    active: Mutex<HashSet<ObjectId>>,
}

impl ActiveMergeTracker {
    pub fn new() -> Self {
        ActiveMergeTracker::default()
    }

    pub fn is_active(&self, id: ObjectId) -> bool {
        self.active.lock().contains(&id)
    }

    pub fn mark_active(&self, ids: &[ObjectId]) {
        let mut active = self.active.lock();
        for id in ids {
            active.insert(*id);
        }
    }

    /// Releases a merge's inputs once it has finished, successfully or not.
    /// Failed local merges leave the inputs live and eligible again; a
    /// remote dispatch failure retries on the next cycle, which likewise
    /// requires releasing the mark.
    pub fn release(&self, ids: &[ObjectId]) {
        let mut active = self.active.lock();
        for id in ids {
            active.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_objects_report_active_until_released() {
        let tracker = ActiveMergeTracker::new();
        let id = ObjectId::from_counter(1);
        assert!(!tracker.is_active(id));
        tracker.mark_active(&[id]);
        assert!(tracker.is_active(id));
        tracker.release(&[id]);
        assert!(!tracker.is_active(id));
    }
}
