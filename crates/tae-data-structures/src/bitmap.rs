use smallvec::SmallVec;

/// Number of bits in the dense, fixed-size form — one per row in a full
/// block, per `block_max_rows`'s default of 8192.
pub const FIXED_SIZE_BITS: usize = 8192;
const FIXED_SIZE_WORDS: usize = FIXED_SIZE_BITS / 64;

/// The dense, fixed-size delete bitmap.
///
/// The "empty" sentinel must be representable by a zeroed allocation, so
/// that a block of memory can be recycled from a pool without an explicit
/// re-initialization pass. A `FixedSizeBitmap` of all zero words is
/// therefore exactly the empty bitmap — there is no separate flag field to
/// keep in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSizeBitmap {
    words: [u64; FIXED_SIZE_WORDS],
}

impl Default for FixedSizeBitmap {
    fn default() -> Self {
        FixedSizeBitmap {
            words: [0u64; FIXED_SIZE_WORDS],
        }
    }
}

impl FixedSizeBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zeroed bitmap is empty by construction — no flag is read.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn set(&mut self, offset: u32) {
        let (word, bit) = Self::locate(offset);
        self.words[word] |= 1 << bit;
    }

    pub fn clear(&mut self, offset: u32) {
        let (word, bit) = Self::locate(offset);
        self.words[word] &= !(1 << bit);
    }

    pub fn contains(&self, offset: u32) -> bool {
        let (word, bit) = Self::locate(offset);
        self.words[word] & (1 << bit) != 0
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..FIXED_SIZE_BITS as u32).filter(move |o| self.contains(*o))
    }

    fn locate(offset: u32) -> (usize, u32) {
        assert!((offset as usize) < FIXED_SIZE_BITS, "offset out of range for a full block");
        ((offset / 64) as usize, offset % 64)
    }
}

/// A general, sparse delete bitmap for blocks that are not full-sized, or
/// whose deletions are few relative to `FIXED_SIZE_BITS`.
///
/// Kept as a sorted, de-duplicated list rather than a true roaring bitmap —
/// this engine's scope does not require the full roaring container
/// hierarchy, only the sparse-vs-dense duality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseBitmap {
    offsets: SmallVec<[u32; 8]>,
}

impl SparseBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn set(&mut self, offset: u32) {
        match self.offsets.binary_search(&offset) {
            Ok(_) => {}
            Err(pos) => self.offsets.insert(pos, offset),
        }
    }

    pub fn clear(&mut self, offset: u32) {
        if let Ok(pos) = self.offsets.binary_search(&offset) {
            self.offsets.remove(pos);
        }
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.offsets.binary_search(&offset).is_ok()
    }

    pub fn count_ones(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().copied()
    }
}

/// The two on-wire delete bitmap shapes, preserved as a tagged sum rather
/// than unified into one representation: the persistence boundary between
/// a dense and a sparse bitmap is a per-block choice, not something this
/// type collapses away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteBitmap {
    Dense(FixedSizeBitmap),
    Sparse(SparseBitmap),
}

impl Default for DeleteBitmap {
    fn default() -> Self {
        DeleteBitmap::Sparse(SparseBitmap::default())
    }
}

impl DeleteBitmap {
    pub fn dense() -> Self {
        DeleteBitmap::Dense(FixedSizeBitmap::new())
    }

    pub fn sparse() -> Self {
        DeleteBitmap::Sparse(SparseBitmap::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DeleteBitmap::Dense(b) => b.is_empty(),
            DeleteBitmap::Sparse(b) => b.is_empty(),
        }
    }

    pub fn set(&mut self, offset: u32) {
        match self {
            DeleteBitmap::Dense(b) => b.set(offset),
            DeleteBitmap::Sparse(b) => b.set(offset),
        }
    }

    pub fn contains(&self, offset: u32) -> bool {
        match self {
            DeleteBitmap::Dense(b) => b.contains(offset),
            DeleteBitmap::Sparse(b) => b.contains(offset),
        }
    }

    pub fn count_ones(&self) -> u32 {
        match self {
            DeleteBitmap::Dense(b) => b.count_ones(),
            DeleteBitmap::Sparse(b) => b.count_ones(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            DeleteBitmap::Dense(b) => Box::new(b.iter()),
            DeleteBitmap::Sparse(b) => Box::new(b.iter()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_fixed_size_bitmap_is_zeroed_and_empty() {
        let bm = FixedSizeBitmap::new();
        assert!(bm.is_empty());
        assert_eq!(bm.words, [0u64; FIXED_SIZE_WORDS]);
    }

    #[test]
    fn set_then_clear_returns_to_zeroed_empty() {
        let mut bm = FixedSizeBitmap::new();
        bm.set(42);
        assert!(!bm.is_empty());
        bm.clear(42);
        assert!(bm.is_empty(), "clearing the only set bit must restore the zeroed sentinel");
    }

    #[test]
    fn dense_bitmap_roundtrip() {
        let mut bm = FixedSizeBitmap::new();
        for o in [0, 1, 63, 64, 8191] {
            bm.set(o);
        }
        for o in [0, 1, 63, 64, 8191] {
            assert!(bm.contains(o));
        }
        assert_eq!(bm.count_ones(), 5);
        assert!(!bm.contains(2));
    }

    #[test]
    fn sparse_bitmap_stays_sorted_and_deduped() {
        let mut bm = SparseBitmap::new();
        bm.set(5);
        bm.set(1);
        bm.set(5);
        assert_eq!(bm.iter().collect::<Vec<_>>(), vec![1, 5]);
    }

    proptest::proptest! {
        #[test]
        fn dense_and_sparse_agree_on_membership(offsets in proptest::collection::vec(0u32..FIXED_SIZE_BITS as u32, 0..50)) {
            let mut dense = FixedSizeBitmap::new();
            let mut sparse = SparseBitmap::new();
            for &o in &offsets {
                dense.set(o);
                sparse.set(o);
            }
            for o in 0..FIXED_SIZE_BITS as u32 {
                proptest::prop_assert_eq!(dense.contains(o), sparse.contains(o));
            }
        }
    }
}
