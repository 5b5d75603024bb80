//! Object/block data node: memory and persisted variants behind a uniform
//! scan/dedup trait, zone-map and bloom-filter pruning, dedup-by-primary-key
//! scans.

pub mod bloom;
pub mod error;
pub mod node;
pub mod store;
pub mod table;
pub mod zonemap;

pub use bloom::BloomFilter;
pub use error::{Result, StorageError};
pub use node::{fill_block_tombstones, MemoryNode, NodeState, NodeT, ObjectDataNode, PersistedNode};
pub use store::{InMemoryObjectStore, ObjectStore};
pub use table::TableStore;
pub use zonemap::{build_zone_map, definitely_excludes};
