//! Transactional index objects
//!
//! Committed index objects are immutable. Writes go to diff layers held by a
//! `TransactionalLayerMaintainer`; a commit folds them into fresh copies
//! carrying new version ids, so formulas computed over an old copy stay valid
//! for the readers holding it.

mod bitmap;
mod price_list;

pub use bitmap::{BitmapChanges, TransactionalBitmap};
pub use price_list::{PriceListIndex, PriceListIndexChanges};
