//! Price list leaf

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use crate::index::PriceListIndex;
use crate::price::{FilteredPriceRecords, IndexedFilteredPriceRecords, PriceIndexKey};

use super::{
    expect_no_inner_formulas, hash_node, FilteredPriceRecordAccessor, Formula, FormulaHasher,
    FormulaResult,
};

const CLASS_ID: u64 = 0x3a5c_0010;
const OPERATION_COST: u64 = 1;

/// Entities of one price list together with their price lookup.
///
/// Termination formulas consult these leaves in tree order, which is the
/// price-list priority.
#[derive(Debug, Clone)]
pub struct PriceListSourceFormula {
    key: PriceIndexKey,
    transactional_id: u64,
    entity_ids: RoaringBitmap,
    records: Arc<dyn FilteredPriceRecords>,
    filter_hash: u64,
    hash: OnceLock<u64>,
}

impl PriceListSourceFormula {
    pub fn new(
        key: PriceIndexKey,
        transactional_id: u64,
        entity_ids: RoaringBitmap,
        records: Arc<dyn FilteredPriceRecords>,
    ) -> Self {
        Self {
            key,
            transactional_id,
            entity_ids,
            records,
            filter_hash: 0,
            hash: OnceLock::new(),
        }
    }

    /// Every price of the index.
    pub fn from_index(index: &Arc<PriceListIndex>) -> Self {
        Self::new(
            index.key().clone(),
            index.id(),
            index.entity_ids().bitmap().clone(),
            Arc::new(IndexedFilteredPriceRecords::new(Arc::clone(index))),
        )
    }

    /// Prices of the index whose internal id is in `price_ids`.
    pub fn restricted(index: &Arc<PriceListIndex>, price_ids: RoaringBitmap) -> Self {
        let entity_ids = index
            .prices()
            .filter(|record| price_ids.contains(record.internal_price_id))
            .map(|record| record.entity_primary_key)
            .collect();
        let filter_hash = FormulaHasher::new().hash_ints(price_ids.iter());
        Self {
            filter_hash,
            ..Self::new(
                index.key().clone(),
                index.id(),
                entity_ids,
                Arc::new(IndexedFilteredPriceRecords::restricted_to(
                    Arc::clone(index),
                    price_ids,
                )),
            )
        }
    }

    pub fn key(&self) -> &PriceIndexKey {
        &self.key
    }
}

impl Formula for PriceListSourceFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.entity_ids)
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &[]
    }

    fn operation_cost(&self) -> u64 {
        OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.entity_ids.len()
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let hasher = FormulaHasher::new();
            // the index version is reported by gather_transactional_ids
            let additional =
                hasher.hash_longs(&[self.key.compute_hash(&hasher), self.filter_hash]);
            hash_node(CLASS_ID, additional, &[])
        })
    }

    fn gather_transactional_ids(&self) -> BTreeSet<u64> {
        BTreeSet::from([self.transactional_id])
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        expect_no_inner_formulas(&inner_formulas)?;
        Ok(Arc::new(self.clone()))
    }

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        Some(self)
    }
}

impl FilteredPriceRecordAccessor for PriceListSourceFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        Ok(Arc::clone(&self.records))
    }
}
