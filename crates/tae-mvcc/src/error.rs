use tae_primitives::BlockId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MvccError {
    #[error("append node for block {block} has non-contiguous start_row {start_row} (expected {expected})")]
    NonContiguousAppend {
        block: BlockId,
        start_row: u32,
        expected: u32,
    },
}

pub type Result<T> = std::result::Result<T, MvccError>;
