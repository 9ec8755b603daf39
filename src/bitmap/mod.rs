//! Compressed bitmaps
//!
//! Entity and price id sets are roaring bitmaps. This module adds batch
//! iteration over a pooled scratch buffer, the access pattern used by
//! termination formulas when resolving prices entity by entity.

mod batch;

pub use batch::BatchIterator;
pub use roaring::RoaringBitmap as Bitmap;
