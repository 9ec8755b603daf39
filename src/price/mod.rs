//! Price sub-domain value objects
//!
//! - `PriceRecord` - one resolved price of an entity's inner record
//! - `PriceEvaluationContext` - interning key of a price computation
//! - `PricePredicate` / `PriceRecordPredicate` - amount range filters
//! - `InnerRecordSelection` - which inner records may contribute a price
//! - `FilteredPriceRecords` - per-entity price lookup, resolved or index-backed

mod context;
mod filtered;
mod handling;
mod predicate;
mod record;
mod selection;

pub use context::{PriceEvaluationContext, PriceIndexKey};
pub use filtered::{
    CombinedFilteredPriceRecords, FilteredPriceRecords, IndexedFilteredPriceRecords,
    PriceRecordLookup, ResolvedFilteredPriceRecords, SortingForm,
};
pub use handling::PriceInnerRecordHandling;
pub use predicate::{PricePredicate, PriceRecordPredicate};
pub use record::{PriceAmounts, PriceRecord, QueryPriceMode};
pub use selection::InnerRecordSelection;
