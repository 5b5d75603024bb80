use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch reading commit at byte offset {offset}")]
    ChecksumMismatch { offset: u64 },
    #[error("no commit found at lsn {0}")]
    NotFound(u64),
    #[error("log is corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, LogError>;
