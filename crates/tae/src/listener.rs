use std::sync::Arc;

use tae_catalog::TableEntry;
use tae_mvcc::AppendListener;

/// Bridges the MVCC chain's append notification to the catalog's row
/// counter. `tae-mvcc` reports rows as `u32` (a single append range never
/// exceeds `block_max_rows`); `TableEntry::on_append_committed` tracks the
/// table-wide total as `u64`, so this is a widening cast, never truncating.
/// Lives here rather than in either lower crate so neither gains a direct
/// dependency on the other's types.
pub struct TableRowCounter(pub Arc<TableEntry>);

impl AppendListener for TableRowCounter {
    fn on_append_committed(&self, rows: u32, is_tombstone: bool) {
        self.0.on_append_committed(rows as u64, is_tombstone);
    }
}
