//! The MVCC-versioned metadata tree for the TAE engine: database, table,
//! object, and block entries, each with its own create/drop bookkeeping
//! and per-entry locking.

mod block;
mod catalog;
mod db;
mod error;
mod object;
mod replay;
mod state;
mod table;
mod view;

pub use block::BlockEntry;
pub use catalog::Catalog;
pub use db::DbEntry;
pub use error::{CatalogError, Result};
pub use object::{ColumnZoneMap, ObjectEntry, ObjectKind, ObjectStats, PersistedBy};
pub use replay::{ReplayCommand, ReplayObserver, TsoObserver};
pub use state::EntryState;
pub use table::{SchemaVersion, TableEntry};
pub use view::{is_visible, ReadView, Snapshot};
