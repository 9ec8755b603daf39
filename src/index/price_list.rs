//! Price index of one price list

use std::collections::{BTreeMap, BTreeSet};

use roaring::RoaringBitmap;

use crate::price::{PriceIndexKey, PriceRecord};
use crate::transactional::{
    TransactionalLayerCreator, TransactionalLayerMaintainer, TransactionalLayerProducer,
    TransactionalResult,
};
use crate::version::{next_version_id, VersionOverflowError};

use super::TransactionalBitmap;

type PriceKey = (u32, u32);

fn price_key(record: &PriceRecord) -> PriceKey {
    (record.entity_primary_key, record.internal_price_id)
}

/// Pending price changes, keyed by `(entity, internal price id)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceListIndexChanges {
    upserted: BTreeMap<PriceKey, PriceRecord>,
    removed: BTreeSet<PriceKey>,
}

impl PriceListIndexChanges {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }

    pub fn upserted_count(&self) -> usize {
        self.upserted.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Prices of a price list in one currency.
///
/// Prices of an entity are kept ordered by internal price id. The entity id
/// set is a nested transactional bitmap folded together with the index.
#[derive(Debug, Clone)]
pub struct PriceListIndex {
    id: u64,
    key: PriceIndexKey,
    prices: BTreeMap<u32, Vec<PriceRecord>>,
    entity_ids: TransactionalBitmap,
    price_ids: RoaringBitmap,
}

impl PriceListIndex {
    pub fn new(key: PriceIndexKey) -> Result<Self, VersionOverflowError> {
        Self::with_prices(key, std::iter::empty())
    }

    /// Index pre-populated with committed prices; a later record with the
    /// same entity and price id replaces an earlier one.
    pub fn with_prices<I>(key: PriceIndexKey, records: I) -> Result<Self, VersionOverflowError>
    where
        I: IntoIterator<Item = PriceRecord>,
    {
        let mut by_key = BTreeMap::new();
        for record in records {
            by_key.insert(price_key(&record), record);
        }
        let prices = group_by_entity(by_key.into_values());
        let entity_ids = TransactionalBitmap::new(prices.keys().copied().collect())?;
        Ok(Self::assemble(next_version_id()?, key, prices, entity_ids))
    }

    fn assemble(
        id: u64,
        key: PriceIndexKey,
        prices: BTreeMap<u32, Vec<PriceRecord>>,
        entity_ids: TransactionalBitmap,
    ) -> Self {
        let price_ids = prices
            .values()
            .flatten()
            .map(|record| record.internal_price_id)
            .collect();
        Self {
            id,
            key,
            prices,
            entity_ids,
            price_ids,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &PriceIndexKey {
        &self.key
    }

    pub fn entity_ids(&self) -> &TransactionalBitmap {
        &self.entity_ids
    }

    pub fn price_ids(&self) -> &RoaringBitmap {
        &self.price_ids
    }

    pub fn price_count(&self) -> usize {
        self.prices.values().map(Vec::len).sum()
    }

    /// All committed prices, by entity then internal price id.
    pub fn prices(&self) -> impl Iterator<Item = &PriceRecord> + '_ {
        self.prices.values().flatten()
    }

    /// Committed prices of the entity, ordered by internal price id.
    pub fn prices_of_entity(&self, entity_primary_key: u32) -> &[PriceRecord] {
        self.prices
            .get(&entity_primary_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Prices of the entity as seen by `tx`.
    pub fn prices_of_entity_in(
        &self,
        tx: Option<&TransactionalLayerMaintainer>,
        entity_primary_key: u32,
    ) -> Vec<PriceRecord> {
        let committed = self.prices_of_entity(entity_primary_key);
        match tx.and_then(|tx| tx.get_transactional_memory_layer_if_exists(self)) {
            Some(changes) => effective_prices(committed, changes, entity_primary_key),
            None => committed.to_vec(),
        }
    }

    /// Inserts or replaces a price.
    pub fn upsert_price(
        &self,
        tx: &mut TransactionalLayerMaintainer,
        record: PriceRecord,
    ) -> TransactionalResult<()> {
        let changes = tx.get_or_create_transactional_memory_layer(self)?;
        let key = price_key(&record);
        changes.removed.remove(&key);
        changes.upserted.insert(key, record);
        self.entity_ids.add(tx, record.entity_primary_key)?;
        Ok(())
    }

    /// Removes a price; returns true when it existed.
    pub fn remove_price(
        &self,
        tx: &mut TransactionalLayerMaintainer,
        entity_primary_key: u32,
        internal_price_id: u32,
    ) -> TransactionalResult<bool> {
        let key = (entity_primary_key, internal_price_id);
        let committed = self.prices_of_entity(entity_primary_key);
        let in_committed = committed
            .iter()
            .any(|record| record.internal_price_id == internal_price_id);

        let changes = tx.get_or_create_transactional_memory_layer(self)?;
        let existed = changes.upserted.remove(&key).is_some()
            || (in_committed && !changes.removed.contains(&key));
        if in_committed {
            changes.removed.insert(key);
        }
        let remaining = effective_prices(committed, changes, entity_primary_key).len();

        if remaining == 0 {
            self.entity_ids.remove(tx, entity_primary_key)?;
        }
        Ok(existed)
    }
}

fn group_by_entity<I>(records: I) -> BTreeMap<u32, Vec<PriceRecord>>
where
    I: IntoIterator<Item = PriceRecord>,
{
    let mut prices: BTreeMap<u32, Vec<PriceRecord>> = BTreeMap::new();
    for record in records {
        prices
            .entry(record.entity_primary_key)
            .or_default()
            .push(record);
    }
    for records in prices.values_mut() {
        records.sort_by_key(|record| record.internal_price_id);
    }
    prices
}

fn effective_prices(
    committed: &[PriceRecord],
    changes: &PriceListIndexChanges,
    entity_primary_key: u32,
) -> Vec<PriceRecord> {
    let mut merged: BTreeMap<u32, PriceRecord> = committed
        .iter()
        .filter(|record| !changes.removed.contains(&price_key(record)))
        .map(|record| (record.internal_price_id, *record))
        .collect();
    for (_, record) in changes
        .upserted
        .range((entity_primary_key, 0)..=(entity_primary_key, u32::MAX))
    {
        merged.insert(record.internal_price_id, *record);
    }
    merged.into_values().collect()
}

impl TransactionalLayerCreator for PriceListIndex {
    type Layer = PriceListIndexChanges;

    fn id(&self) -> u64 {
        self.id
    }

    fn create_layer(&self) -> PriceListIndexChanges {
        PriceListIndexChanges::default()
    }
}

impl TransactionalLayerProducer for PriceListIndex {
    type Output = PriceListIndex;

    fn create_copy_with_merged_transactional_memory(
        &self,
        layer: Option<&PriceListIndexChanges>,
        maintainer: &mut TransactionalLayerMaintainer,
    ) -> TransactionalResult<PriceListIndex> {
        let entity_ids = maintainer.get_state_copy_with_committed_changes(&self.entity_ids)?;
        let changes = match layer {
            Some(changes) if !changes.is_empty() => changes,
            _ => {
                return Ok(Self {
                    entity_ids,
                    ..self.clone()
                })
            }
        };

        let mut by_key: BTreeMap<PriceKey, PriceRecord> = self
            .prices
            .values()
            .flatten()
            .map(|record| (price_key(record), *record))
            .filter(|(key, _)| !changes.removed.contains(key))
            .collect();
        by_key.extend(changes.upserted.iter().map(|(key, record)| (*key, *record)));

        let prices = group_by_entity(by_key.into_values());
        Ok(Self::assemble(
            next_version_id()?,
            self.key.clone(),
            prices,
            entity_ids,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::PriceInnerRecordHandling;

    fn key() -> PriceIndexKey {
        PriceIndexKey::new("basic", "EUR", PriceInnerRecordHandling::None)
    }

    fn index() -> PriceListIndex {
        PriceListIndex::with_prices(
            key(),
            vec![
                PriceRecord::new(2, 10, 0, 120, 100),
                PriceRecord::new(1, 10, 1, 60, 50),
                PriceRecord::new(3, 20, 0, 240, 200),
            ],
        )
        .unwrap()
    }

    fn price_ids(records: &[PriceRecord]) -> Vec<u32> {
        records.iter().map(|record| record.internal_price_id).collect()
    }

    #[test]
    fn test_prices_grouped_and_ordered() {
        let index = index();
        assert_eq!(price_ids(index.prices_of_entity(10)), vec![1, 2]);
        assert!(index.prices_of_entity(99).is_empty());
        assert_eq!(index.price_count(), 3);
        assert_eq!(index.entity_ids().bitmap().len(), 2);
        assert_eq!(index.price_ids().len(), 3);
    }

    #[test]
    fn test_upsert_visible_only_in_transaction() {
        let index = index();
        let mut tx = TransactionalLayerMaintainer::new(1);
        index.upsert_price(&mut tx, PriceRecord::new(4, 30, 0, 10, 8)).unwrap();
        assert_eq!(price_ids(&index.prices_of_entity_in(Some(&tx), 30)), vec![4]);
        assert!(index.prices_of_entity_in(None, 30).is_empty());
        assert!(index.entity_ids().contains(Some(&tx), 30));
        assert!(!index.entity_ids().contains(None, 30));
    }

    #[test]
    fn test_removing_last_price_removes_entity() {
        let index = index();
        let mut tx = TransactionalLayerMaintainer::new(1);
        assert!(index.remove_price(&mut tx, 20, 3).unwrap());
        assert!(!index.entity_ids().contains(Some(&tx), 20));
        assert!(index.remove_price(&mut tx, 10, 1).unwrap());
        assert!(index.entity_ids().contains(Some(&tx), 10));
        assert!(!index.remove_price(&mut tx, 10, 1).unwrap());
    }

    #[test]
    fn test_commit_folds_index_and_entity_ids() {
        let index = index();
        let mut tx = TransactionalLayerMaintainer::new(1);
        index.upsert_price(&mut tx, PriceRecord::new(2, 10, 0, 130, 110)).unwrap();
        index.upsert_price(&mut tx, PriceRecord::new(4, 30, 0, 10, 8)).unwrap();
        index.remove_price(&mut tx, 20, 3).unwrap();

        let next = tx.commit(&index).unwrap();
        assert_ne!(next.id(), index.id());
        assert_ne!(next.entity_ids().id(), index.entity_ids().id());
        assert_eq!(next.prices_of_entity(10)[1].price_with_tax(), 130);
        assert_eq!(price_ids(next.prices_of_entity(30)), vec![4]);
        assert!(next.prices_of_entity(20).is_empty());
        let entities: Vec<u32> = next.entity_ids().bitmap().iter().collect();
        assert_eq!(entities, vec![10, 30]);

        assert_eq!(index.prices_of_entity(10)[1].price_with_tax(), 120);
        assert_eq!(index.price_count(), 3);
    }

    #[test]
    fn test_commit_without_changes_keeps_version() {
        let index = index();
        let mut tx = TransactionalLayerMaintainer::new(1);
        let next = tx.commit(&index).unwrap();
        assert_eq!(next.id(), index.id());
        assert_eq!(next.entity_ids().id(), index.entity_ids().id());
    }
}
