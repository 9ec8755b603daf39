//! Price records

use serde::{Deserialize, Serialize};

/// Which amount of a price the query works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPriceMode {
    #[default]
    WithTax,
    WithoutTax,
}

impl QueryPriceMode {
    pub(crate) fn hash_value(&self) -> u64 {
        match self {
            QueryPriceMode::WithTax => 1,
            QueryPriceMode::WithoutTax => 2,
        }
    }
}

/// Amounts of one price, in the smallest indexed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PriceAmounts {
    pub with_tax: i64,
    pub without_tax: i64,
}

impl PriceAmounts {
    pub fn new(with_tax: i64, without_tax: i64) -> Self {
        Self {
            with_tax,
            without_tax,
        }
    }

    /// Amount relevant for `mode`.
    pub fn amount(&self, mode: QueryPriceMode) -> i64 {
        match mode {
            QueryPriceMode::WithTax => self.with_tax,
            QueryPriceMode::WithoutTax => self.without_tax,
        }
    }

    /// Component-wise sum; `None` if either component overflows.
    pub fn checked_add(self, other: PriceAmounts) -> Option<PriceAmounts> {
        Some(PriceAmounts {
            with_tax: self.with_tax.checked_add(other.with_tax)?,
            without_tax: self.without_tax.checked_add(other.without_tax)?,
        })
    }
}

/// A resolved price of an entity.
///
/// `internal_price_id` is the id the price indexes put into price id bitmaps.
/// Cumulated (virtual) records produced by summing carry id `0` and are told
/// apart from real prices by their own flag, so `0` stays a valid price id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceRecord {
    pub internal_price_id: u32,
    pub entity_primary_key: u32,
    pub inner_record_id: i32,
    pub amounts: PriceAmounts,
    #[serde(default)]
    cumulated: bool,
}

impl PriceRecord {
    pub fn new(
        internal_price_id: u32,
        entity_primary_key: u32,
        inner_record_id: i32,
        price_with_tax: i64,
        price_without_tax: i64,
    ) -> Self {
        Self {
            internal_price_id,
            entity_primary_key,
            inner_record_id,
            amounts: PriceAmounts::new(price_with_tax, price_without_tax),
            cumulated: false,
        }
    }

    /// Virtual record carrying the sum of an entity's inner record prices.
    pub fn cumulated(entity_primary_key: u32, amounts: PriceAmounts) -> Self {
        Self {
            internal_price_id: 0,
            entity_primary_key,
            inner_record_id: 0,
            amounts,
            cumulated: true,
        }
    }

    pub fn price_with_tax(&self) -> i64 {
        self.amounts.with_tax
    }

    pub fn price_without_tax(&self) -> i64 {
        self.amounts.without_tax
    }

    /// Amount relevant for `mode`.
    pub fn amount(&self, mode: QueryPriceMode) -> i64 {
        self.amounts.amount(mode)
    }

    /// Returns true for records produced by summing.
    pub fn is_cumulated(&self) -> bool {
        self.cumulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_by_mode() {
        let record = PriceRecord::new(7, 1, 2, 121, 100);
        assert_eq!(record.amount(QueryPriceMode::WithTax), 121);
        assert_eq!(record.amount(QueryPriceMode::WithoutTax), 100);
        assert!(!record.is_cumulated());
    }

    #[test]
    fn test_cumulated_record() {
        let amounts = PriceAmounts::new(10, 8)
            .checked_add(PriceAmounts::new(5, 4))
            .unwrap();
        let record = PriceRecord::cumulated(3, amounts);
        assert!(record.is_cumulated());
        assert_eq!(record.price_with_tax(), 15);
        assert_eq!(record.price_without_tax(), 12);
    }

    #[test]
    fn test_price_id_zero_is_not_cumulated() {
        let real = PriceRecord::new(0, 3, 0, 15, 12);
        let cumulated = PriceRecord::cumulated(3, PriceAmounts::new(15, 12));
        assert!(!real.is_cumulated());
        assert_ne!(real, cumulated);
    }

    #[test]
    fn test_checked_add_overflow() {
        let half = PriceAmounts::new(i64::MAX / 2 + 1, 1);
        assert_eq!(half.checked_add(half), None);
        assert_eq!(
            PriceAmounts::new(1, i64::MIN).checked_add(PriceAmounts::new(1, -1)),
            None
        );
    }
}
