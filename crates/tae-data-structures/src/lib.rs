//! Bitmap and small-collection helpers shared across the TAE engine.

mod bitmap;

pub use bitmap::{DeleteBitmap, FixedSizeBitmap, SparseBitmap, FIXED_SIZE_BITS};
