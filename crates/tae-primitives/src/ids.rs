use std::fmt;
use uuid::Uuid;

/// A fixed 16-byte identifier for an object.
///
/// `Ord` is derived over the raw bytes, giving the lexicographic order the
/// data model requires for `RowId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub [u8; 16]);

impl ObjectId {
    pub fn new_random() -> Self {
        ObjectId(*Uuid::new_v4().as_bytes())
    }

    /// Deterministic id from a counter, for reproducible tests.
    pub fn from_counter(n: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&n.to_be_bytes());
        ObjectId(bytes)
    }

    pub const fn zero() -> Self {
        ObjectId([0u8; 16])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A block within an object, identified by the object plus a 16-bit offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    pub object: ObjectId,
    pub block_offset: u16,
}

impl BlockId {
    pub const fn new(object: ObjectId, block_offset: u16) -> Self {
        BlockId { object, block_offset }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object, self.block_offset)
    }
}

/// A row within a block, identified by the block plus a 32-bit row offset.
///
/// Total order is lexicographic: object, then block offset, then row offset
/// — exactly the field declaration order, so the derived `Ord` is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId {
    pub block: BlockId,
    pub row_offset: u32,
}

impl RowId {
    pub const fn new(block: BlockId, row_offset: u32) -> Self {
        RowId { block, row_offset }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.row_offset)
    }
}

/// Globally unique table identifier, assigned by the Catalog on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u64);

/// Database identifier, assigned by the Catalog on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbId(pub u64);

/// Identifies a transaction for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_lexicographic_order() {
        let o1 = ObjectId::from_counter(1);
        let o2 = ObjectId::from_counter(2);
        let low = RowId::new(BlockId::new(o1, 5), 100);
        let high_block = RowId::new(BlockId::new(o1, 6), 0);
        let high_object = RowId::new(BlockId::new(o2, 0), 0);
        assert!(low < high_block);
        assert!(high_block < high_object);
    }
}
