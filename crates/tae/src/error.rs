use tae_catalog::CatalogError;
use tae_compaction::CompactionError;
use tae_durability::DurabilityError;
use tae_storage::StorageError;
use tae_txn::TxnError;
use thiserror::Error;

/// The engine's public error type. Every lower crate's error composes in
/// directly; replay and configuration add the two variants those crates
/// have no occasion to raise themselves.
#[derive(Debug, Error)]
pub enum TaeError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Txn(#[from] TxnError),
    #[error(transparent)]
    Durability(#[from] DurabilityError),
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    /// Raised directly by the facade's replay pipeline and snapshot shim,
    /// which call into `tae-storage` without going through `tae-txn`'s own
    /// `StorageError` flattening.
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Cancelled(#[from] tae_primitives::Cancelled),
    /// Replay found a WAL record it could not reassemble or dispatch: a
    /// missing chunk, an unrecognized command, or a table referenced before
    /// it was registered. Fatal: the engine logs and halts, with no
    /// automatic truncation or repair.
    #[error("replay corruption: {0}")]
    Corruption(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TaeError>;
