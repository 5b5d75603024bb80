//! Core identifiers and scalar types shared across the TAE engine crates.

mod cancel;
mod ids;
mod timestamp;
mod value;

pub use cancel::{CancelToken, Cancelled};
pub use ids::{BlockId, DbId, ObjectId, RowId, TableId, TxnId};
pub use timestamp::{Timestamp, TsoAllocator};
pub use value::{Batch, ColumnSchema, Row, Schema, Value};
