//! Cache payload of a computed termination formula

use std::collections::BTreeSet;
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::observability::{log_event_with_fields, metrics, Event};
use crate::performance::{MemoryLayout, LONG_SIZE};
use crate::price::{
    FilteredPriceRecords, PriceEvaluationContext, QueryPriceMode, ResolvedFilteredPriceRecords,
};

use super::{
    expect_no_inner_formulas, FilteredPriceRecordAccessor, Formula, FormulaError, FormulaResult,
};

const OPERATION_COST: u64 = 1;

/// Immutable result of a termination formula, keyed by its content hash.
///
/// A payload may replace any formula with the same content hash that reads
/// the same index versions (see `is_interchangeable_with`). The payload is
/// itself a formula, so it can be spliced into a tree in place of the
/// formula it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenedFormula {
    pub(crate) formula_hash: u64,
    pub(crate) transactional_id_hash: u64,
    pub(crate) transactional_ids: Vec<u64>,
    pub(crate) bitmap: RoaringBitmap,
    pub(crate) price_records: Arc<ResolvedFilteredPriceRecords>,
    pub(crate) records_filtered_out_by_predicate: RoaringBitmap,
    pub(crate) price_evaluation_context: PriceEvaluationContext,
    pub(crate) query_price_mode: QueryPriceMode,
    pub(crate) price_from: Option<i64>,
    pub(crate) price_to: Option<i64>,
}

impl FlattenedFormula {
    pub(crate) fn built(self) -> Self {
        metrics().increment_flattened_formulas();
        let (hash, size) = (self.formula_hash.to_string(), self.bitmap.len().to_string());
        log_event_with_fields(
            Event::FlattenedFormulaBuilt,
            &[("formula_hash", &hash), ("result", &size)],
        );
        self
    }

    pub fn formula_hash(&self) -> u64 {
        self.formula_hash
    }

    pub fn transactional_id_hash(&self) -> u64 {
        self.transactional_id_hash
    }

    pub fn transactional_ids(&self) -> &[u64] {
        &self.transactional_ids
    }

    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    pub fn price_records(&self) -> &ResolvedFilteredPriceRecords {
        &self.price_records
    }

    pub fn records_filtered_out_by_predicate(&self) -> &RoaringBitmap {
        &self.records_filtered_out_by_predicate
    }

    pub fn price_evaluation_context(&self) -> &PriceEvaluationContext {
        &self.price_evaluation_context
    }

    pub fn query_price_mode(&self) -> QueryPriceMode {
        self.query_price_mode
    }

    pub fn price_from(&self) -> Option<i64> {
        self.price_from
    }

    pub fn price_to(&self) -> Option<i64> {
        self.price_to
    }

    /// True when `formula` has the same content and reads the same index versions.
    pub fn is_interchangeable_with(&self, formula: &dyn Formula) -> bool {
        formula.content_hash() == self.formula_hash
            && formula
                .gather_transactional_ids()
                .iter()
                .eq(self.transactional_ids.iter())
    }

    /// Retained size of a payload with the given parts.
    pub fn estimate_size(
        layout: &MemoryLayout,
        transactional_ids: usize,
        bitmap: &RoaringBitmap,
        price_records: usize,
        records_filtered_out_by_predicate: &RoaringBitmap,
        context: &PriceEvaluationContext,
    ) -> usize {
        layout.object_size(3 * LONG_SIZE + 6 * layout.reference_size)
            + layout.array_size(transactional_ids, LONG_SIZE)
            + layout.bitmap_size(bitmap)
            + ResolvedFilteredPriceRecords::estimate_size_of(layout, price_records)
            + layout.bitmap_size(records_filtered_out_by_predicate)
            + context.estimate_size(layout)
    }

    /// Retained size of this payload.
    pub fn size(&self, layout: &MemoryLayout) -> usize {
        Self::estimate_size(
            layout,
            self.transactional_ids.len(),
            &self.bitmap,
            self.price_records.len(),
            &self.records_filtered_out_by_predicate,
            &self.price_evaluation_context,
        )
    }

    pub fn to_json(&self) -> FormulaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> FormulaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Formula for FlattenedFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.bitmap)
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &[]
    }

    fn operation_cost(&self) -> u64 {
        OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    fn content_hash(&self) -> u64 {
        self.formula_hash
    }

    fn gather_transactional_ids(&self) -> BTreeSet<u64> {
        self.transactional_ids.iter().copied().collect()
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        expect_no_inner_formulas(&inner_formulas)
            .map_err(|_| FormulaError::premise("flattened formula has no inner formulas"))?;
        Ok(Arc::new(self.clone()))
    }

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        Some(self)
    }
}

impl FilteredPriceRecordAccessor for FlattenedFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        let records: Arc<dyn FilteredPriceRecords> = self.price_records.clone();
        Ok(records)
    }
}
