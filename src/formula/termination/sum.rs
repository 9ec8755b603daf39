//! Termination summing inner record prices

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::formula::{
    expect_single_inner_formula, CacheableFormula, FilteredPriceRecordAccessor, FlattenedFormula,
    Formula, FormulaError, FormulaHasher, FormulaResult,
};
use crate::price::{
    FilteredPriceRecords, InnerRecordSelection, PriceAmounts, PriceEvaluationContext, PriceRecord,
    PriceRecordPredicate, QueryPriceMode,
};

use super::{price_not_found, EntityPrice, PriceTerminationFormula, TerminationCore, TerminationOutcome};

const CLASS_ID: u64 = 0x3a5c_0104;
pub(crate) const OPERATION_COST: u64 = 18_077;

/// Entity composed of parts, priced as the sum of its parts.
///
/// Prices are bucketed per inner record with first-found-wins in priority
/// order; the winners are summed into one cumulated record which the
/// predicate then tests. Components the selection expects but no price list
/// resolves contribute their fallback amount.
#[derive(Debug)]
pub struct SumPriceTerminationFormula {
    core: TerminationCore,
    selection: InnerRecordSelection,
}

impl SumPriceTerminationFormula {
    pub fn new(
        delegate: Arc<dyn Formula>,
        context: PriceEvaluationContext,
        mode: QueryPriceMode,
        predicate: PriceRecordPredicate,
    ) -> Self {
        Self {
            core: TerminationCore::new(delegate, context, mode, predicate),
            selection: InnerRecordSelection::ALL,
        }
    }

    /// Limits contributing inner records and supplies fallbacks for absent ones.
    pub fn with_inner_record_selection(self, selection: InnerRecordSelection) -> Self {
        Self {
            core: self.core.with_delegate(Arc::clone(self.core.delegate())),
            selection,
        }
    }

    pub fn inner_record_selection(&self) -> &InnerRecordSelection {
        &self.selection
    }

    fn outcome(&self) -> FormulaResult<&TerminationOutcome> {
        let predicate = self.core.predicate();
        let selection = &self.selection;
        let accepts = |record: &PriceRecord| selection.accepts(record);
        let mut winners: Vec<PriceRecord> = Vec::new();
        self.core.outcome("SUM", |lookups, entity, hint| {
            lookups.inner_record_winners(entity, hint, &accepts, &mut winners);
            let mut total = PriceAmounts::default();
            let mut components = winners.len();
            let overflow = || FormulaError::PriceOverflow {
                entity_primary_key: entity,
            };
            for winner in &winners {
                total = total.checked_add(winner.amounts).ok_or_else(overflow)?;
            }
            let present = |inner_record_id: i32| {
                winners
                    .iter()
                    .any(|winner| winner.inner_record_id == inner_record_id)
            };
            for fallback in selection.missing_components(entity, present) {
                total = total.checked_add(fallback).ok_or_else(overflow)?;
                components += 1;
            }

            if components == 0 {
                if selection.is_all() {
                    return Err(price_not_found(entity));
                }
                return Ok(EntityPrice::Rejected(None));
            }
            let cumulated = PriceRecord::cumulated(entity, total);
            if predicate.test(&cumulated) {
                Ok(EntityPrice::Accepted(cumulated))
            } else {
                Ok(EntityPrice::Rejected(Some(cumulated)))
            }
        })
    }

    fn with_core(&self, core: TerminationCore) -> Self {
        Self {
            core,
            selection: self.selection.clone(),
        }
    }
}

impl Formula for SumPriceTerminationFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.outcome()?.result)
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        self.core.inner()
    }

    fn operation_cost(&self) -> u64 {
        OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.core.estimated_cardinality()
    }

    fn content_hash(&self) -> u64 {
        let selection = self.selection.compute_hash(&FormulaHasher::new());
        self.core.content_hash(CLASS_ID, &[selection])
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        let delegate = expect_single_inner_formula(inner_formulas)?;
        Ok(Arc::new(self.with_core(self.core.with_delegate(delegate))))
    }

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        Some(self)
    }
}

impl FilteredPriceRecordAccessor for SumPriceTerminationFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        let records: Arc<dyn FilteredPriceRecords> = self.outcome()?.records.clone();
        Ok(records)
    }
}

impl CacheableFormula for SumPriceTerminationFormula {
    fn to_serializable_formula(
        &self,
        formula_hash: u64,
        hasher: &FormulaHasher,
    ) -> FormulaResult<FlattenedFormula> {
        let outcome = self.outcome()?;
        Ok(self
            .core
            .flatten(outcome, formula_hash, hasher, self.gather_transactional_ids()))
    }

    fn serializable_formula_size_estimate(&self) -> FormulaResult<usize> {
        let outcome = self.outcome()?;
        Ok(self
            .core
            .size_estimate(outcome, self.gather_transactional_ids().len()))
    }
}

impl PriceTerminationFormula for SumPriceTerminationFormula {
    fn price_evaluation_context(&self) -> &PriceEvaluationContext {
        self.core.context()
    }

    fn price_predicate(&self) -> &PriceRecordPredicate {
        self.core.predicate()
    }

    fn query_price_mode(&self) -> QueryPriceMode {
        self.core.mode()
    }

    fn records_filtered_out_by_predicate(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.outcome()?.excluded)
    }

    fn clone_with_price_predicate_filtered_out_results(
        &self,
    ) -> FormulaResult<Arc<dyn PriceTerminationFormula>> {
        let excluded = self.records_filtered_out_by_predicate()?;
        Ok(Arc::new(self.with_core(self.core.complement(excluded))))
    }

    fn into_formula(self: Arc<Self>) -> Arc<dyn Formula> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{OrFormula, PriceListSourceFormula};
    use crate::price::{
        PriceIndexKey, PriceInnerRecordHandling, ResolvedFilteredPriceRecords, SortingForm,
    };

    fn source(name: &str, records: Vec<PriceRecord>) -> Arc<dyn Formula> {
        let entity_ids = records.iter().map(|r| r.entity_primary_key).collect();
        Arc::new(PriceListSourceFormula::new(
            PriceIndexKey::new(name, "EUR", PriceInnerRecordHandling::Sum),
            1,
            entity_ids,
            Arc::new(ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)),
        ))
    }

    fn formula(predicate: PriceRecordPredicate) -> SumPriceTerminationFormula {
        let vip = source("vip", vec![PriceRecord::new(1, 4, 1, 90, 75)]);
        let basic = source(
            "basic",
            vec![PriceRecord::new(2, 4, 1, 100, 80), PriceRecord::new(3, 4, 2, 50, 40)],
        );
        SumPriceTerminationFormula::new(
            Arc::new(OrFormula::new(vec![vip, basic]).unwrap()),
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
            predicate,
        )
    }

    fn cumulated(formula: &SumPriceTerminationFormula, entity: u32) -> Option<PriceRecord> {
        let records = formula.filtered_price_records().unwrap();
        let mut found = None;
        records.for_each_price_of_entity(entity, entity, &mut |r| found = Some(*r));
        found
    }

    #[test]
    fn test_sums_first_found_winners() {
        let formula = formula(PriceRecordPredicate::ALL_RECORDS);
        assert!(formula.compute().unwrap().contains(4));
        let record = cumulated(&formula, 4).unwrap();
        assert!(record.is_cumulated());
        assert_eq!(record.price_with_tax(), 140);
        assert_eq!(record.price_without_tax(), 115);
    }

    #[test]
    fn test_predicate_tests_cumulated_amount() {
        let pass = formula(PriceRecordPredicate::between(QueryPriceMode::WithTax, Some(140), None));
        let fail = formula(PriceRecordPredicate::between(QueryPriceMode::WithTax, Some(141), None));
        assert!(pass.compute().unwrap().contains(4));
        assert!(fail.compute().unwrap().is_empty());
        assert!(fail.records_filtered_out_by_predicate().unwrap().contains(4));
    }

    #[test]
    fn test_fallback_fills_missing_component() {
        let selection = InnerRecordSelection::ALL
            .with_fallback(4, 3, PriceAmounts::new(10, 8))
            .with_fallback(4, 2, PriceAmounts::new(1000, 1000));
        let formula = formula(PriceRecordPredicate::ALL_RECORDS).with_inner_record_selection(selection);
        let record = cumulated(&formula, 4).unwrap();
        assert_eq!(record.price_with_tax(), 150);
    }

    #[test]
    fn test_restricted_selection_drops_other_components() {
        let formula = formula(PriceRecordPredicate::ALL_RECORDS)
            .with_inner_record_selection(InnerRecordSelection::only([2]));
        assert_eq!(cumulated(&formula, 4).unwrap().price_with_tax(), 50);
    }

    #[test]
    fn test_nothing_selected_rejects_entity() {
        let formula = formula(PriceRecordPredicate::ALL_RECORDS)
            .with_inner_record_selection(InnerRecordSelection::only([9]));
        assert!(formula.compute().unwrap().is_empty());
        assert!(formula.records_filtered_out_by_predicate().unwrap().contains(4));
    }

    #[test]
    fn test_overflowing_sum_is_an_error() {
        let half = i64::MAX / 2 + 1;
        let parts = source(
            "parts",
            vec![PriceRecord::new(1, 5, 1, half, 1), PriceRecord::new(2, 5, 2, half, 1)],
        );
        let formula = SumPriceTerminationFormula::new(
            Arc::new(OrFormula::new(vec![parts]).unwrap()),
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
            PriceRecordPredicate::ALL_RECORDS,
        );
        assert_eq!(
            formula.compute().unwrap_err(),
            FormulaError::PriceOverflow {
                entity_primary_key: 5
            }
        );
    }

    #[test]
    fn test_operation_cost() {
        assert_eq!(formula(PriceRecordPredicate::ALL_RECORDS).operation_cost(), 18_077);
    }
}
