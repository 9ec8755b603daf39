//! Inner record selection

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::formula::FormulaHasher;

use super::{PriceAmounts, PriceRecord};

/// Restricts which inner records may contribute a price to an entity.
///
/// For summed prices the selection also carries fallback amounts per
/// `(entity, inner record)`: a component the price lists do not resolve
/// contributes its fallback instead of dropping out of the total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerRecordSelection {
    allowed: Option<BTreeSet<i32>>,
    fallback: BTreeMap<(u32, i32), PriceAmounts>,
}

impl InnerRecordSelection {
    /// Selection accepting every inner record with no fallbacks.
    pub const ALL: InnerRecordSelection = InnerRecordSelection {
        allowed: None,
        fallback: BTreeMap::new(),
    };

    pub fn only<I>(inner_record_ids: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        Self {
            allowed: Some(inner_record_ids.into_iter().collect()),
            fallback: BTreeMap::new(),
        }
    }

    /// Adds the amount an absent component of `entity_primary_key` contributes.
    pub fn with_fallback(
        mut self,
        entity_primary_key: u32,
        inner_record_id: i32,
        amounts: PriceAmounts,
    ) -> Self {
        self.fallback
            .insert((entity_primary_key, inner_record_id), amounts);
        self
    }

    pub fn is_all(&self) -> bool {
        self.allowed.is_none() && self.fallback.is_empty()
    }

    pub fn accepts(&self, record: &PriceRecord) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&record.inner_record_id))
    }

    /// Fallback amounts of `entity_primary_key` for inner records `present` rejects.
    pub fn missing_components<'a, F>(
        &'a self,
        entity_primary_key: u32,
        present: F,
    ) -> impl Iterator<Item = PriceAmounts> + 'a
    where
        F: Fn(i32) -> bool + 'a,
    {
        self.fallback
            .range((entity_primary_key, i32::MIN)..=(entity_primary_key, i32::MAX))
            .filter(move |((_, inner_record_id), _)| !present(*inner_record_id))
            .map(|(_, amounts)| *amounts)
    }

    pub fn compute_hash(&self, hasher: &FormulaHasher) -> u64 {
        if self.is_all() {
            return hasher.hash_longs(&[0]);
        }
        let mut values = Vec::new();
        match &self.allowed {
            Some(allowed) => {
                values.push(allowed.len() as u64);
                values.extend(allowed.iter().map(|id| *id as u64));
            }
            None => values.push(u64::MAX),
        }
        for ((entity, inner), amounts) in &self.fallback {
            values.push(u64::from(*entity));
            values.push(*inner as u64);
            values.push(amounts.with_tax as u64);
            values.push(amounts.without_tax as u64);
        }
        hasher.hash_longs(&values)
    }
}
