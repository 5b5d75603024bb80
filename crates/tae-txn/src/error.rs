use tae_catalog::CatalogError;
use tae_durability::DurabilityError;
use tae_mvcc::MvccError;
use tae_primitives::{Cancelled, TableId};
use tae_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the Transaction Store's public contract. `Duplicate`
/// is flattened out of [`StorageError`] rather than wrapped, so callers can
/// match `TxnError::Duplicate(keyIdx)` directly the way the batch dedup
/// contract names it.
#[derive(Debug, Error)]
pub enum TxnError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Mvcc(#[from] MvccError),
    #[error(transparent)]
    Durability(#[from] DurabilityError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("batch dedup found an existing key at index {0}")]
    Duplicate(usize),
    #[error("block {0} has no data in the object store")]
    BlockNotFound(tae_primitives::BlockId),
    #[error("write-write conflict")]
    Conflict,
    #[error("row not found")]
    NotFound,
    #[error("row is deleted")]
    Deleted,
    #[error("table has no primary key column")]
    NoPrimaryKey,
    #[error("malformed WAL command: {0}")]
    Malformed(String),
    #[error("unknown table {0:?}")]
    UnknownTable(TableId),
}

impl From<StorageError> for TxnError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate(idx) => TxnError::Duplicate(idx),
            StorageError::BlockNotFound(b) => TxnError::BlockNotFound(b),
            StorageError::NoPrimaryKey => TxnError::NoPrimaryKey,
            StorageError::Cancelled(c) => TxnError::Cancelled(c),
            StorageError::Mvcc(m) => TxnError::Mvcc(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, TxnError>;
