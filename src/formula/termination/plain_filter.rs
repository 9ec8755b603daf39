//! Termination taking the first price found

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::formula::{
    expect_single_inner_formula, CacheableFormula, FilteredPriceRecordAccessor, FlattenedFormula,
    Formula, FormulaHasher, FormulaResult,
};
use crate::price::{FilteredPriceRecords, PriceEvaluationContext, PriceRecordPredicate, QueryPriceMode};

use super::{price_not_found, EntityPrice, PriceTerminationFormula, TerminationCore, TerminationOutcome};

const CLASS_ID: u64 = 0x3a5c_0102;
pub(crate) const OPERATION_COST: u64 = 14_087;

/// Resolves each entity to the first price of the highest-priority source
/// that has one, then applies the predicate to it.
///
/// An entity without any price fails the computation.
#[derive(Debug)]
pub struct PlainWithFilterPriceTerminationFormula {
    core: TerminationCore,
}

impl PlainWithFilterPriceTerminationFormula {
    pub fn new(
        delegate: Arc<dyn Formula>,
        context: PriceEvaluationContext,
        mode: QueryPriceMode,
        predicate: PriceRecordPredicate,
    ) -> Self {
        Self {
            core: TerminationCore::new(delegate, context, mode, predicate),
        }
    }

    fn outcome(&self) -> FormulaResult<&TerminationOutcome> {
        let predicate = self.core.predicate();
        self.core.outcome("PLAIN_WITH_FILTER", |lookups, entity, hint| {
            let record = lookups
                .first_price(entity, hint)
                .ok_or_else(|| price_not_found(entity))?;
            if predicate.test(&record) {
                Ok(EntityPrice::Accepted(record))
            } else {
                Ok(EntityPrice::Rejected(Some(record)))
            }
        })
    }
}

impl Formula for PlainWithFilterPriceTerminationFormula {
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
        self.core.content_hash(CLASS_ID, &[])
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        let delegate = expect_single_inner_formula(inner_formulas)?;
        Ok(Arc::new(Self {
            core: self.core.with_delegate(delegate),
        }))
    }

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        Some(self)
    }
}

impl FilteredPriceRecordAccessor for PlainWithFilterPriceTerminationFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        let records: Arc<dyn FilteredPriceRecords> = self.outcome()?.records.clone();
        Ok(records)
    }
}

impl CacheableFormula for PlainWithFilterPriceTerminationFormula {
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

impl PriceTerminationFormula for PlainWithFilterPriceTerminationFormula {
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
        Ok(Arc::new(Self {
            core: self.core.complement(excluded),
        }))
    }

    fn into_formula(self: Arc<Self>) -> Arc<dyn Formula> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{FormulaError, OrFormula, PriceListSourceFormula};
    use crate::price::{
        PriceIndexKey, PriceInnerRecordHandling, PriceRecord, ResolvedFilteredPriceRecords,
        SortingForm,
    };

    fn source(name: &str, records: Vec<PriceRecord>) -> Arc<dyn Formula> {
        let entity_ids = records.iter().map(|r| r.entity_primary_key).collect();
        Arc::new(PriceListSourceFormula::new(
            PriceIndexKey::new(name, "EUR", PriceInnerRecordHandling::None),
            1,
            entity_ids,
            Arc::new(ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)),
        ))
    }

    fn formula(from: Option<i64>, to: Option<i64>) -> PlainWithFilterPriceTerminationFormula {
        let vip = source("vip", vec![PriceRecord::new(1, 1, 0, 80, 80)]);
        let basic = source(
            "basic",
            vec![
                PriceRecord::new(2, 1, 0, 100, 100),
                PriceRecord::new(3, 2, 0, 200, 200),
                PriceRecord::new(4, 3, 0, 300, 300),
            ],
        );
        let delegate: Arc<dyn Formula> = Arc::new(OrFormula::new(vec![vip, basic]).unwrap());
        PlainWithFilterPriceTerminationFormula::new(
            delegate,
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
            PriceRecordPredicate::between(QueryPriceMode::WithTax, from, to),
        )
    }

    fn ids(bitmap: &RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_first_source_price_wins() {
        let formula = formula(None, Some(90));
        assert_eq!(ids(formula.compute().unwrap()), vec![1]);
        assert_eq!(ids(formula.records_filtered_out_by_predicate().unwrap()), vec![2, 3]);
        let records = formula.filtered_price_records().unwrap();
        let mut seen = Vec::new();
        records.for_each_price_of_entity(1, 1, &mut |r| seen.push(r.internal_price_id));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_complement_computes_excluded() {
        let formula = formula(Some(150), None);
        let excluded = formula.records_filtered_out_by_predicate().unwrap().clone();
        let complement = formula.clone_with_price_predicate_filtered_out_results().unwrap();
        assert_eq!(complement.compute().unwrap(), &excluded);
        assert!(complement.records_filtered_out_by_predicate().unwrap().is_empty());
        assert!(complement.price_predicate().is_all_records());
    }

    #[test]
    fn test_missing_price_is_fatal() {
        let delegate: Arc<dyn Formula> = Arc::new(OrFormula::new(vec![
            source("basic", vec![PriceRecord::new(1, 1, 0, 10, 10)]),
            Arc::new(crate::formula::ConstantFormula::new([9u32].into_iter().collect())),
        ]).unwrap());
        let formula = PlainWithFilterPriceTerminationFormula::new(
            delegate,
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
            PriceRecordPredicate::ALL_RECORDS,
        );
        let err = formula.compute().unwrap_err();
        assert_eq!(err, FormulaError::PriceNotFound { entity_primary_key: 9 });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bound_changes_hash() {
        assert_eq!(formula(Some(1), None).content_hash(), formula(Some(1), None).content_hash());
        assert_ne!(formula(Some(1), None).content_hash(), formula(Some(2), None).content_hash());
    }
}
