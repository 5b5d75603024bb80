use tae_primitives::TableId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error(transparent)]
    Txn(#[from] tae_txn::TxnError),
    #[error(transparent)]
    Storage(#[from] tae_storage::StorageError),
    #[error(transparent)]
    Cancelled(#[from] tae_primitives::Cancelled),
    #[error("merge scheduler has no runtime registered for table {0:?}")]
    UnknownTable(TableId),
    #[error("remote dispatch failed: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, CompactionError>;
