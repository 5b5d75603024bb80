use tae_primitives::BlockId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("batch dedup found an existing key at index {0}")]
    Duplicate(usize),
    #[error("block {0} has no data in the object store")]
    BlockNotFound(BlockId),
    #[error("schema has no primary key column")]
    NoPrimaryKey,
    #[error(transparent)]
    Cancelled(#[from] tae_primitives::Cancelled),
    #[error(transparent)]
    Mvcc(#[from] tae_mvcc::MvccError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
