use thiserror::Error;

#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Log(#[from] tae_commitlog::error::LogError),
    #[error("log group {0:?} is not open")]
    UnknownGroup(crate::group::LogGroup),
    #[error(transparent)]
    Cancelled(#[from] tae_primitives::Cancelled),
    #[error("durability writer thread for group {0:?} has shut down")]
    WriterGone(crate::group::LogGroup),
}

pub type Result<T> = std::result::Result<T, DurabilityError>;
