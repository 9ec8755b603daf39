//! Inner record handling strategies

use serde::{Deserialize, Serialize};

/// How prices of an entity's inner records combine into one entity price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriceInnerRecordHandling {
    /// The entity has a single price per price list.
    #[default]
    None,
    /// The entity is represented by its cheapest variant.
    LowestPrice,
    /// The entity price is the sum of its components.
    Sum,
    /// Handling is not known; price resolution is not possible.
    Unknown,
}

impl PriceInnerRecordHandling {
    pub(crate) fn hash_value(&self) -> u64 {
        match self {
            PriceInnerRecordHandling::None => 1,
            PriceInnerRecordHandling::LowestPrice => 2,
            PriceInnerRecordHandling::Sum => 3,
            PriceInnerRecordHandling::Unknown => 4,
        }
    }
}
