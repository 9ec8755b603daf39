//! Price evaluation context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formula::FormulaHasher;
use crate::performance::{MemoryLayout, LONG_SIZE};

use super::PriceInnerRecordHandling;

/// Identifies one price index: a price list in a currency under a handling mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceIndexKey {
    pub price_list: String,
    pub currency: String,
    #[serde(default)]
    pub handling: PriceInnerRecordHandling,
}

impl PriceIndexKey {
    pub fn new(
        price_list: impl Into<String>,
        currency: impl Into<String>,
        handling: PriceInnerRecordHandling,
    ) -> Self {
        Self {
            price_list: price_list.into(),
            currency: currency.into(),
            handling,
        }
    }

    pub fn compute_hash(&self, hasher: &FormulaHasher) -> u64 {
        hasher.hash_longs(&[
            hasher.hash_str(&self.price_list),
            hasher.hash_str(&self.currency),
            self.handling.hash_value(),
        ])
    }
}

/// Validity instant plus the ordered price indexes a query consults.
///
/// Used as an interning key: price formulas sharing a context share their
/// price-resolution subtree. Order of the keys is the price-list priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceEvaluationContext {
    /// Epoch seconds; `None` means prices of any validity.
    valid_at: Option<i64>,
    price_index_keys: Vec<PriceIndexKey>,
}

impl PriceEvaluationContext {
    pub fn new(valid_at: Option<i64>, price_index_keys: Vec<PriceIndexKey>) -> Self {
        Self {
            valid_at,
            price_index_keys,
        }
    }

    pub fn valid_at_instant(instant: DateTime<Utc>, price_index_keys: Vec<PriceIndexKey>) -> Self {
        Self::new(Some(instant.timestamp()), price_index_keys)
    }

    pub fn unbounded(price_index_keys: Vec<PriceIndexKey>) -> Self {
        Self::new(None, price_index_keys)
    }

    pub fn valid_at(&self) -> Option<i64> {
        self.valid_at
    }

    pub fn price_index_keys(&self) -> &[PriceIndexKey] {
        &self.price_index_keys
    }

    pub fn compute_hash(&self, hasher: &FormulaHasher) -> u64 {
        let mut values = Vec::with_capacity(self.price_index_keys.len() + 2);
        match self.valid_at {
            Some(at) => values.extend([1, at as u64]),
            None => values.push(0),
        }
        values.extend(self.price_index_keys.iter().map(|key| key.compute_hash(hasher)));
        hasher.hash_longs(&values)
    }

    /// Retained size estimate used by cache payload sizing.
    pub fn estimate_size(&self, layout: &MemoryLayout) -> usize {
        let keys: usize = self
            .price_index_keys
            .iter()
            .map(|key| {
                layout.object_size(
                    2 * layout.reference_size + key.price_list.len() + key.currency.len(),
                )
            })
            .sum();
        layout.object_size(LONG_SIZE + layout.reference_size)
            + layout.array_size(self.price_index_keys.len(), layout.reference_size)
            + keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn keys(names: &[&str]) -> Vec<PriceIndexKey> {
        names
            .iter()
            .map(|name| PriceIndexKey::new(*name, "EUR", PriceInnerRecordHandling::None))
            .collect()
    }

    #[test]
    fn test_equal_contexts_hash_equally() {
        let hasher = FormulaHasher::new();
        let a = PriceEvaluationContext::new(Some(10), keys(&["basic", "vip"]));
        let b = PriceEvaluationContext::new(Some(10), keys(&["basic", "vip"]));
        assert_eq!(a, b);
        assert_eq!(a.compute_hash(&hasher), b.compute_hash(&hasher));
    }

    #[test]
    fn test_key_order_matters() {
        let hasher = FormulaHasher::new();
        let a = PriceEvaluationContext::unbounded(keys(&["basic", "vip"]));
        let b = PriceEvaluationContext::unbounded(keys(&["vip", "basic"]));
        assert_ne!(a, b);
        assert_ne!(a.compute_hash(&hasher), b.compute_hash(&hasher));
    }

    #[test]
    fn test_unbounded_differs_from_epoch() {
        let hasher = FormulaHasher::new();
        let a = PriceEvaluationContext::unbounded(keys(&["basic"]));
        let b = PriceEvaluationContext::new(Some(0), keys(&["basic"]));
        assert_ne!(a.compute_hash(&hasher), b.compute_hash(&hasher));
    }

    #[test]
    fn test_unbounded_differs_from_negative_instant() {
        let hasher = FormulaHasher::new();
        let unbounded = PriceEvaluationContext::unbounded(keys(&["basic"]));
        for at in [-1, i64::MIN, i64::MAX] {
            let bounded = PriceEvaluationContext::new(Some(at), keys(&["basic"]));
            assert_ne!(unbounded.compute_hash(&hasher), bounded.compute_hash(&hasher));
        }
    }

    #[test]
    fn test_index_keys_order_by_list_currency_then_handling() {
        let mut sorted = vec![
            PriceIndexKey::new("basic", "EUR", PriceInnerRecordHandling::Sum),
            PriceIndexKey::new("basic", "CZK", PriceInnerRecordHandling::None),
            PriceIndexKey::new("basic", "EUR", PriceInnerRecordHandling::None),
        ];
        sorted.sort();
        assert_eq!(sorted[0].currency, "CZK");
        assert_eq!(sorted[1].handling, PriceInnerRecordHandling::None);
        assert_eq!(sorted[2].handling, PriceInnerRecordHandling::Sum);
    }

    #[test]
    fn test_valid_at_instant() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let context = PriceEvaluationContext::valid_at_instant(instant, keys(&["basic"]));
        assert_eq!(context.valid_at(), Some(instant.timestamp()));
    }

    #[test]
    fn test_estimate_size_grows_with_keys() {
        let layout = MemoryLayout::DEFAULT;
        let small = PriceEvaluationContext::unbounded(keys(&["basic"]));
        let large = PriceEvaluationContext::unbounded(keys(&["basic", "vip", "b2b"]));
        assert!(large.estimate_size(&layout) > small.estimate_size(&layout));
    }
}
