//! Per-entity price lookup
//!
//! Two physical forms share one visitor contract:
//! - `ResolvedFilteredPriceRecords` - a materialized array (termination output, cache payload)
//! - `IndexedFilteredPriceRecords` - a view over a `PriceListIndex` restricted to admissible price ids

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::index::PriceListIndex;
use crate::performance::{MemoryLayout, INT_SIZE, LONG_SIZE};

use super::PriceRecord;

/// Order in which a records container keeps its prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingForm {
    EntityPk,
    PriceId,
}

/// Stateful cursor over a records container.
///
/// Entity ids should be requested in ascending order; `upper_bound_hint` is
/// the last entity id of the batch being resolved and lets cursor-based forms
/// narrow their search window. Requesting an earlier entity restarts the cursor.
pub trait PriceRecordLookup {
    /// Visits every price of the entity; returns true if at least one was visited.
    fn for_each_price_of_entity(
        &mut self,
        entity_primary_key: u32,
        upper_bound_hint: u32,
        visitor: &mut dyn FnMut(&PriceRecord),
    ) -> bool;
}

/// Price records of one price source, looked up per entity.
pub trait FilteredPriceRecords: fmt::Debug + Send + Sync {
    fn sorting_form(&self) -> SortingForm;

    fn lookup(&self) -> Box<dyn PriceRecordLookup + '_>;

    /// One-shot lookup; prefer `lookup()` when resolving many entities.
    fn for_each_price_of_entity(
        &self,
        entity_primary_key: u32,
        upper_bound_hint: u32,
        visitor: &mut dyn FnMut(&PriceRecord),
    ) -> bool {
        self.lookup()
            .for_each_price_of_entity(entity_primary_key, upper_bound_hint, visitor)
    }

    /// Materializes the prices of `entities` into an entity-ordered array.
    fn materialize(&self, entities: &RoaringBitmap) -> ResolvedFilteredPriceRecords {
        let mut lookup = self.lookup();
        let mut records = Vec::new();
        let last = entities.max().unwrap_or(0);
        for entity in entities {
            lookup.for_each_price_of_entity(entity, last, &mut |record| records.push(*record));
        }
        ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)
    }
}

/// Materialized price records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFilteredPriceRecords {
    records: Vec<PriceRecord>,
    sorting_form: SortingForm,
}

impl ResolvedFilteredPriceRecords {
    /// Sorts `records` into `sorting_form`; prices of one entity keep their relative order.
    pub fn new(mut records: Vec<PriceRecord>, sorting_form: SortingForm) -> Self {
        match sorting_form {
            SortingForm::EntityPk => records.sort_by_key(|record| record.entity_primary_key),
            SortingForm::PriceId => records.sort_by_key(|record| record.internal_price_id),
        }
        Self {
            records,
            sorting_form,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), SortingForm::EntityPk)
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retained size estimate used by cache payload sizing.
    pub fn estimate_size(&self, layout: &MemoryLayout) -> usize {
        Self::estimate_size_of(layout, self.records.len())
    }

    /// Retained size estimate of a container holding `count` records.
    pub fn estimate_size_of(layout: &MemoryLayout, count: usize) -> usize {
        let record = layout.object_size(3 * INT_SIZE + 2 * LONG_SIZE);
        layout.object_size(layout.reference_size)
            + layout.array_size(count, layout.reference_size)
            + count * record
    }
}

impl FilteredPriceRecords for ResolvedFilteredPriceRecords {
    fn sorting_form(&self) -> SortingForm {
        self.sorting_form
    }

    fn lookup(&self) -> Box<dyn PriceRecordLookup + '_> {
        match self.sorting_form {
            SortingForm::EntityPk => Box::new(EntityCursor::new(Cow::Borrowed(&self.records))),
            SortingForm::PriceId => {
                let mut by_entity = self.records.clone();
                by_entity.sort_by_key(|record| record.entity_primary_key);
                Box::new(EntityCursor::new(Cow::Owned(by_entity)))
            }
        }
    }
}

/// Cursor over entity-ordered records.
struct EntityCursor<'a> {
    records: Cow<'a, [PriceRecord]>,
    position: usize,
    window: Option<(u32, usize)>,
}

impl<'a> EntityCursor<'a> {
    fn new(records: Cow<'a, [PriceRecord]>) -> Self {
        Self {
            records,
            position: 0,
            window: None,
        }
    }
}

impl PriceRecordLookup for EntityCursor<'_> {
    fn for_each_price_of_entity(
        &mut self,
        entity_primary_key: u32,
        upper_bound_hint: u32,
        visitor: &mut dyn FnMut(&PriceRecord),
    ) -> bool {
        let records: &[PriceRecord] = &self.records;
        if self.position > 0 && records[self.position - 1].entity_primary_key >= entity_primary_key {
            self.position = 0;
            self.window = None;
        }

        let bound = upper_bound_hint.max(entity_primary_key);
        let end = match self.window {
            Some((hint, end)) if hint == bound => end,
            _ => {
                let end = self.position
                    + records[self.position..].partition_point(|r| r.entity_primary_key <= bound);
                self.window = Some((bound, end));
                end
            }
        };

        let window = &records[self.position..end];
        let mut index = self.position + window.partition_point(|r| r.entity_primary_key < entity_primary_key);
        let mut found = false;
        while index < end && records[index].entity_primary_key == entity_primary_key {
            visitor(&records[index]);
            found = true;
            index += 1;
        }
        self.position = index;
        found
    }
}

/// Prices of a price list index restricted to an admissible price id set.
#[derive(Debug, Clone)]
pub struct IndexedFilteredPriceRecords {
    index: Arc<PriceListIndex>,
    price_ids: Option<RoaringBitmap>,
}

impl IndexedFilteredPriceRecords {
    /// All prices of the index.
    pub fn new(index: Arc<PriceListIndex>) -> Self {
        Self {
            index,
            price_ids: None,
        }
    }

    /// Only prices whose internal id is in `price_ids`.
    pub fn restricted_to(index: Arc<PriceListIndex>, price_ids: RoaringBitmap) -> Self {
        Self {
            index,
            price_ids: Some(price_ids),
        }
    }

    pub fn index(&self) -> &Arc<PriceListIndex> {
        &self.index
    }

    fn admits(&self, record: &PriceRecord) -> bool {
        self.price_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(record.internal_price_id))
    }
}

impl FilteredPriceRecords for IndexedFilteredPriceRecords {
    fn sorting_form(&self) -> SortingForm {
        SortingForm::PriceId
    }

    fn lookup(&self) -> Box<dyn PriceRecordLookup + '_> {
        Box::new(IndexLookup { records: self })
    }
}

struct IndexLookup<'a> {
    records: &'a IndexedFilteredPriceRecords,
}

impl PriceRecordLookup for IndexLookup<'_> {
    fn for_each_price_of_entity(
        &mut self,
        entity_primary_key: u32,
        _upper_bound_hint: u32,
        visitor: &mut dyn FnMut(&PriceRecord),
    ) -> bool {
        let mut found = false;
        for record in self.records.index.prices_of_entity(entity_primary_key) {
            if self.records.admits(record) {
                visitor(record);
                found = true;
            }
        }
        found
    }
}

/// Several sources visited in priority order.
#[derive(Debug, Clone, Default)]
pub struct CombinedFilteredPriceRecords {
    sources: Vec<Arc<dyn FilteredPriceRecords>>,
}

impl CombinedFilteredPriceRecords {
    pub fn new(sources: Vec<Arc<dyn FilteredPriceRecords>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Arc<dyn FilteredPriceRecords>] {
        &self.sources
    }
}

impl FilteredPriceRecords for CombinedFilteredPriceRecords {
    fn sorting_form(&self) -> SortingForm {
        if self
            .sources
            .iter()
            .all(|source| source.sorting_form() == SortingForm::EntityPk)
        {
            SortingForm::EntityPk
        } else {
            SortingForm::PriceId
        }
    }

    fn lookup(&self) -> Box<dyn PriceRecordLookup + '_> {
        Box::new(CombinedLookup {
            lookups: self.sources.iter().map(|source| source.lookup()).collect(),
            claimed: Vec::new(),
            claimed_by_source: Vec::new(),
        })
    }
}

/// Visits each (entity, inner record) pair from the first source that prices it.
struct CombinedLookup<'a> {
    lookups: Vec<Box<dyn PriceRecordLookup + 'a>>,
    /// Inner record ids priced by a higher-priority source for the current entity.
    claimed: Vec<i32>,
    claimed_by_source: Vec<i32>,
}

impl PriceRecordLookup for CombinedLookup<'_> {
    fn for_each_price_of_entity(
        &mut self,
        entity_primary_key: u32,
        upper_bound_hint: u32,
        visitor: &mut dyn FnMut(&PriceRecord),
    ) -> bool {
        let Self {
            lookups,
            claimed,
            claimed_by_source,
        } = self;
        claimed.clear();
        let mut found = false;
        for lookup in lookups.iter_mut() {
            claimed_by_source.clear();
            lookup.for_each_price_of_entity(entity_primary_key, upper_bound_hint, &mut |record| {
                if !claimed.contains(&record.inner_record_id) {
                    claimed_by_source.push(record.inner_record_id);
                    visitor(record);
                }
            });
            found |= !claimed_by_source.is_empty();
            claimed.append(claimed_by_source);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(lookup: &mut dyn PriceRecordLookup, entity: u32, hint: u32) -> Vec<u32> {
        let mut ids = Vec::new();
        lookup.for_each_price_of_entity(entity, hint, &mut |record| ids.push(record.internal_price_id));
        ids
    }

    fn sample() -> Vec<PriceRecord> {
        vec![
            PriceRecord::new(5, 3, 1, 10, 10),
            PriceRecord::new(1, 1, 1, 10, 10),
            PriceRecord::new(2, 1, 2, 20, 20),
            PriceRecord::new(9, 7, 0, 30, 30),
        ]
    }

    #[test]
    fn test_entity_form_cursor() {
        let records = ResolvedFilteredPriceRecords::new(sample(), SortingForm::EntityPk);
        let mut lookup = records.lookup();
        assert_eq!(collect(lookup.as_mut(), 1, 3), vec![1, 2]);
        assert!(collect(lookup.as_mut(), 2, 3).is_empty());
        assert_eq!(collect(lookup.as_mut(), 3, 3), vec![5]);
        assert_eq!(collect(lookup.as_mut(), 7, 7), vec![9]);
    }

    #[test]
    fn test_cursor_restarts_on_earlier_entity() {
        let records = ResolvedFilteredPriceRecords::new(sample(), SortingForm::EntityPk);
        let mut lookup = records.lookup();
        assert_eq!(collect(lookup.as_mut(), 7, 7), vec![9]);
        assert_eq!(collect(lookup.as_mut(), 1, 7), vec![1, 2]);
        assert_eq!(collect(lookup.as_mut(), 1, 7), vec![1, 2]);
    }

    #[test]
    fn test_hint_below_entity_still_finds_it() {
        let records = ResolvedFilteredPriceRecords::new(sample(), SortingForm::EntityPk);
        assert!(records.for_each_price_of_entity(7, 0, &mut |_| {}));
    }

    #[test]
    fn test_price_id_form_lookup() {
        let records = ResolvedFilteredPriceRecords::new(sample(), SortingForm::PriceId);
        assert_eq!(records.records()[0].internal_price_id, 1);
        let mut lookup = records.lookup();
        assert_eq!(collect(lookup.as_mut(), 1, 7), vec![1, 2]);
        assert_eq!(collect(lookup.as_mut(), 3, 7), vec![5]);
    }

    #[test]
    fn test_combined_visits_in_source_order() {
        let first: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(10, 1, 0, 1, 1)],
            SortingForm::EntityPk,
        ));
        let second: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(4, 1, 1, 1, 1)],
            SortingForm::PriceId,
        ));
        let combined = CombinedFilteredPriceRecords::new(vec![first, second]);
        assert_eq!(combined.sorting_form(), SortingForm::PriceId);
        let mut lookup = combined.lookup();
        assert_eq!(collect(lookup.as_mut(), 1, 1), vec![10, 4]);
    }

    #[test]
    fn test_combined_skips_lower_priority_duplicates() {
        let first: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(1, 7, 1, 10, 10), PriceRecord::new(3, 7, 2, 30, 30)],
            SortingForm::EntityPk,
        ));
        let second: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![
                PriceRecord::new(2, 7, 1, 20, 20),
                PriceRecord::new(4, 7, 3, 40, 40),
                PriceRecord::new(5, 8, 1, 50, 50),
            ],
            SortingForm::EntityPk,
        ));
        let combined = CombinedFilteredPriceRecords::new(vec![first, second]);
        let mut lookup = combined.lookup();
        assert_eq!(collect(lookup.as_mut(), 7, 8), vec![1, 3, 4]);
        // claims of one entity do not leak into the next
        assert_eq!(collect(lookup.as_mut(), 8, 8), vec![5]);
    }

    #[test]
    fn test_combined_reports_missing_entity() {
        let only: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(1, 7, 1, 10, 10)],
            SortingForm::EntityPk,
        ));
        let combined = CombinedFilteredPriceRecords::new(vec![Arc::clone(&only), only]);
        assert!(combined.for_each_price_of_entity(7, 7, &mut |_| {}));
        assert!(!combined.for_each_price_of_entity(9, 9, &mut |_| {}));
    }

    #[test]
    fn test_materialize() {
        let records = ResolvedFilteredPriceRecords::new(sample(), SortingForm::PriceId);
        let entities: RoaringBitmap = [1u32, 7].into_iter().collect();
        let materialized = records.materialize(&entities);
        assert_eq!(materialized.sorting_form(), SortingForm::EntityPk);
        let ids: Vec<u32> = materialized.records().iter().map(|r| r.internal_price_id).collect();
        assert_eq!(ids, vec![1, 2, 9]);
    }

    #[test]
    fn test_size_estimate_grows_with_records() {
        let layout = MemoryLayout::DEFAULT;
        let empty = ResolvedFilteredPriceRecords::empty();
        let full = ResolvedFilteredPriceRecords::new(sample(), SortingForm::EntityPk);
        assert!(full.estimate_size(&layout) > empty.estimate_size(&layout));
    }
}
