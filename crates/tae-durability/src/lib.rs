//! Traits and single-node implementation of durability for the TAE engine.
//!
//! Layers log-group partitioning, LSN assignment, and the `Driver` contract
//! over the raw frame format in `tae-commitlog`.

mod driver;
mod error;
mod group;

pub use driver::{Checkpoint, Driver, Entry, EntryHandle, LocalDriver, CHECKPOINT_TYPE_TAG};
pub use error::DurabilityError;
pub use group::LogGroup;

pub type Result<T> = std::result::Result<T, DurabilityError>;
