use crate::error::{CatalogError, Result};

/// Lifecycle of any catalog entry: `Creating → Committed → Dropping →
/// Dropped`, with either intermediate state able to fall back to
/// `Committed` on rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Creating,
    Committed,
    Dropping,
    Dropped,
}

impl EntryState {
    fn name(self) -> &'static str {
        match self {
            EntryState::Creating => "Creating",
            EntryState::Committed => "Committed",
            EntryState::Dropping => "Dropping",
            EntryState::Dropped => "Dropped",
        }
    }

    /// Applies the commit of the transaction that created or is dropping
    /// this entry.
    pub fn on_commit(self) -> Result<EntryState> {
        match self {
            EntryState::Creating => Ok(EntryState::Committed),
            EntryState::Dropping => Ok(EntryState::Dropped),
            other => Err(CatalogError::InvalidTransition {
                from: other.name(),
                to: "Committed-or-Dropped",
            }),
        }
    }

    /// A soft delete moves a committed entry into `Dropping`.
    pub fn on_soft_delete(self) -> Result<EntryState> {
        match self {
            EntryState::Committed => Ok(EntryState::Dropping),
            other => Err(CatalogError::InvalidTransition {
                from: other.name(),
                to: "Dropping",
            }),
        }
    }

    /// Rollback returns an in-flight transition to its stable predecessor.
    pub fn on_rollback(self) -> Result<EntryState> {
        match self {
            EntryState::Creating => Ok(EntryState::Dropped),
            EntryState::Dropping => Ok(EntryState::Committed),
            other => Err(CatalogError::InvalidTransition {
                from: other.name(),
                to: "rolled-back",
            }),
        }
    }

    pub fn is_visible_candidate(self) -> bool {
        matches!(self, EntryState::Creating | EntryState::Committed | EntryState::Dropping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_commit_drop_cycle() {
        let s = EntryState::Creating;
        let s = s.on_commit().unwrap();
        assert_eq!(s, EntryState::Committed);
        let s = s.on_soft_delete().unwrap();
        assert_eq!(s, EntryState::Dropping);
        let s = s.on_commit().unwrap();
        assert_eq!(s, EntryState::Dropped);
    }

    #[test]
    fn rollback_from_creating_goes_to_dropped() {
        assert_eq!(EntryState::Creating.on_rollback().unwrap(), EntryState::Dropped);
    }

    #[test]
    fn rollback_from_dropping_returns_to_committed() {
        assert_eq!(EntryState::Dropping.on_rollback().unwrap(), EntryState::Committed);
    }

    #[test]
    fn commit_from_committed_is_invalid() {
        assert!(EntryState::Committed.on_commit().is_err());
    }
}
