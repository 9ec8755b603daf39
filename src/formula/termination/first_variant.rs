//! Termination choosing the lowest priced variant

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::formula::{
    expect_single_inner_formula, CacheableFormula, FilteredPriceRecordAccessor, FlattenedFormula,
    Formula, FormulaHasher, FormulaResult,
};
use crate::price::{
    FilteredPriceRecords, InnerRecordSelection, PriceEvaluationContext, PriceRecord,
    PriceRecordPredicate, QueryPriceMode,
};

use super::{price_not_found, EntityPrice, PriceTerminationFormula, TerminationCore, TerminationOutcome};

const CLASS_ID: u64 = 0x3a5c_0103;
pub(crate) const OPERATION_COST: u64 = 18_203;

/// Entity with variants, represented by its cheapest variant.
///
/// Prices are bucketed per inner record; within a bucket the first price
/// found in priority order wins. The entity passes when any winner passes
/// the predicate and is represented by the lowest winner in the query price
/// mode.
///
/// An entity with no price fails the computation, unless an individual price
/// predicate is set: then the entity is simply rejected.
#[derive(Debug)]
pub struct FirstVariantPriceTerminationFormula {
    core: TerminationCore,
    individual_price_predicate: InnerRecordSelection,
}

impl FirstVariantPriceTerminationFormula {
    pub fn new(
        delegate: Arc<dyn Formula>,
        context: PriceEvaluationContext,
        mode: QueryPriceMode,
        predicate: PriceRecordPredicate,
    ) -> Self {
        Self {
            core: TerminationCore::new(delegate, context, mode, predicate),
            individual_price_predicate: InnerRecordSelection::ALL,
        }
    }

    /// Limits which prices may become inner record winners.
    pub fn with_individual_price_predicate(self, selection: InnerRecordSelection) -> Self {
        Self {
            core: self.core.with_delegate(Arc::clone(self.core.delegate())),
            individual_price_predicate: selection,
        }
    }

    pub fn individual_price_predicate(&self) -> &InnerRecordSelection {
        &self.individual_price_predicate
    }

    fn outcome(&self) -> FormulaResult<&TerminationOutcome> {
        let predicate = self.core.predicate();
        let mode = self.core.mode();
        let selection = &self.individual_price_predicate;
        let accepts = |record: &PriceRecord| selection.accepts(record);
        let mut winners = Vec::new();
        self.core.outcome("FIRST_VARIANT", |lookups, entity, hint| {
            lookups.inner_record_winners(entity, hint, &accepts, &mut winners);
            let Some(lowest) = winners.iter().min_by_key(|winner| winner.amount(mode)).copied() else {
                if selection.is_all() {
                    return Err(price_not_found(entity));
                }
                return Ok(EntityPrice::Rejected(None));
            };
            if winners.iter().any(|winner| predicate.test(winner)) {
                Ok(EntityPrice::Accepted(lowest))
            } else {
                Ok(EntityPrice::Rejected(Some(lowest)))
            }
        })
    }

    fn with_core(&self, core: TerminationCore) -> Self {
        Self {
            core,
            individual_price_predicate: self.individual_price_predicate.clone(),
        }
    }
}

impl Formula for FirstVariantPriceTerminationFormula {
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
        let selection = self
            .individual_price_predicate
            .compute_hash(&FormulaHasher::new());
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

impl FilteredPriceRecordAccessor for FirstVariantPriceTerminationFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        let records: Arc<dyn FilteredPriceRecords> = self.outcome()?.records.clone();
        Ok(records)
    }
}

impl CacheableFormula for FirstVariantPriceTerminationFormula {
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

impl PriceTerminationFormula for FirstVariantPriceTerminationFormula {
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
