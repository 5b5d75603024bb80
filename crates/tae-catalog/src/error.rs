use tae_primitives::{DbId, ObjectId, TableId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database {0:?} already exists")]
    DatabaseAlreadyExists(String),
    #[error("database {0:?} not found")]
    DatabaseNotFound(String),
    #[error("database id {0:?} not found")]
    DatabaseIdNotFound(DbId),
    #[error("table id {0:?} not found")]
    TableNotFound(TableId),
    #[error("object id {0} not found")]
    ObjectNotFound(ObjectId),
    #[error("write-write conflict on catalog entry")]
    WriteConflict,
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("replay target entry is missing: {0}")]
    ReplayTargetMissing(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
