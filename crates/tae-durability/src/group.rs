use std::fmt;

/// A log group: at least control/catalog (`Control`) and user-data
/// (`UserData`), each with its own independent LSN sequence. Additional
/// named groups can be introduced by callers (e.g. per-table sharding) via
/// `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogGroup {
    /// Catalog / control-plane mutations.
    Control,
    /// User table append and delete records.
    UserData,
    Custom(u16),
}

impl LogGroup {
    pub(crate) fn file_stem(self) -> String {
        match self {
            LogGroup::Control => "control".to_string(),
            LogGroup::UserData => "userdata".to_string(),
            LogGroup::Custom(n) => format!("custom-{n}"),
        }
    }
}

impl fmt::Display for LogGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_stem())
    }
}
