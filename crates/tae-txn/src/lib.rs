//! Transaction Store: per-transaction workspace staging, batch dedup, and
//! the seven-step prepare/commit pipeline, plus the composed WAL command
//! encoding the pipeline's `PrepareWAL` step writes.
//!
//! Handle borrows locks; commit drains transaction-local state into
//! committed state.

pub mod command;
mod error;
mod store;

pub use command::{
    decode_body, decode_chunk_metadata, encode_body, encode_chunk_metadata, AppendCommand, ChunkMetadata,
    ComposedRecord, DeleteCommand, FreezeCommand, WalCommand,
};
pub use error::{Result, TxnError};
pub use store::{TableRuntime, Txn, TxnConfig, TxnManager, WAL_COMMAND_TYPE_TAG};
