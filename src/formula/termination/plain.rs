//! Termination without price resolution

use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use crate::formula::{
    expect_single_inner_formula, hash_node, CacheableFormula, FilteredPriceRecordAccessor,
    FlattenedFormula, Formula, FormulaHasher, FormulaResult,
};
use crate::performance::MemoryLayout;
use crate::price::{
    CombinedFilteredPriceRecords, FilteredPriceRecords, PriceEvaluationContext,
    PriceRecordPredicate, QueryPriceMode,
};

use super::{find_price_sources, PriceTerminationFormula};

const CLASS_ID: u64 = 0x3a5c_0101;

static NO_PREDICATE: PriceRecordPredicate = PriceRecordPredicate::ALL_RECORDS;

/// Returns the delegate result unchanged; nothing is ever excluded.
///
/// Price records are exposed as the delegate's sources combined in priority
/// order and only materialized when the formula is flattened.
#[derive(Debug)]
pub struct PlainPriceTerminationFormula {
    inner: Vec<Arc<dyn Formula>>,
    context: PriceEvaluationContext,
    mode: QueryPriceMode,
    complement: bool,
    empty: RoaringBitmap,
    records: OnceLock<Arc<CombinedFilteredPriceRecords>>,
    hash: OnceLock<u64>,
}

impl PlainPriceTerminationFormula {
    pub fn new(
        delegate: Arc<dyn Formula>,
        context: PriceEvaluationContext,
        mode: QueryPriceMode,
    ) -> Self {
        Self {
            inner: vec![delegate],
            context,
            mode,
            complement: false,
            empty: RoaringBitmap::new(),
            records: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    fn delegate(&self) -> &Arc<dyn Formula> {
        &self.inner[0]
    }

    fn combined_records(&self) -> FormulaResult<&Arc<CombinedFilteredPriceRecords>> {
        if let Some(records) = self.records.get() {
            return Ok(records);
        }
        let sources = find_price_sources(self.delegate().as_ref())?;
        let records = Arc::new(CombinedFilteredPriceRecords::new(sources));
        Ok(self.records.get_or_init(|| records))
    }
}

impl Formula for PlainPriceTerminationFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        if self.complement {
            Ok(&self.empty)
        } else {
            self.delegate().compute()
        }
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    fn operation_cost(&self) -> u64 {
        0
    }

    fn estimated_cardinality(&self) -> u64 {
        if self.complement {
            0
        } else {
            self.delegate().estimated_cardinality()
        }
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let hasher = FormulaHasher::new();
            let additional = hasher.hash_longs(&[
                self.context.compute_hash(&hasher),
                NO_PREDICATE.compute_hash(&hasher),
                self.mode.hash_value(),
                u64::from(self.complement),
            ]);
            hash_node(CLASS_ID, additional, &self.inner)
        })
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        let delegate = expect_single_inner_formula(inner_formulas)?;
        Ok(Arc::new(Self {
            complement: self.complement,
            ..Self::new(delegate, self.context.clone(), self.mode)
        }))
    }

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        Some(self)
    }
}

impl FilteredPriceRecordAccessor for PlainPriceTerminationFormula {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>> {
        let records: Arc<dyn FilteredPriceRecords> = self.combined_records()?.clone();
        Ok(records)
    }
}

impl CacheableFormula for PlainPriceTerminationFormula {
    fn to_serializable_formula(
        &self,
        formula_hash: u64,
        hasher: &FormulaHasher,
    ) -> FormulaResult<FlattenedFormula> {
        let bitmap = self.compute()?.clone();
        let records = self.combined_records()?.materialize(&bitmap);
        let transactional_ids = self.gather_transactional_ids();
        Ok(FlattenedFormula::built(FlattenedFormula {
            formula_hash,
            transactional_id_hash: hasher.hash_transactional_ids(&transactional_ids),
            transactional_ids: transactional_ids.into_iter().collect(),
            bitmap,
            price_records: Arc::new(records),
            records_filtered_out_by_predicate: RoaringBitmap::new(),
            price_evaluation_context: self.context.clone(),
            query_price_mode: self.mode,
            price_from: None,
            price_to: None,
        }))
    }

    fn serializable_formula_size_estimate(&self) -> FormulaResult<usize> {
        let bitmap = self.compute()?;
        Ok(FlattenedFormula::estimate_size(
            &MemoryLayout::current(),
            self.gather_transactional_ids().len(),
            bitmap,
            bitmap.len() as usize,
            &self.empty,
            &self.context,
        ))
    }
}

impl PriceTerminationFormula for PlainPriceTerminationFormula {
    fn price_evaluation_context(&self) -> &PriceEvaluationContext {
        &self.context
    }

    fn price_predicate(&self) -> &PriceRecordPredicate {
        &NO_PREDICATE
    }

    fn query_price_mode(&self) -> QueryPriceMode {
        self.mode
    }

    fn records_filtered_out_by_predicate(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.empty)
    }

    fn clone_with_price_predicate_filtered_out_results(
        &self,
    ) -> FormulaResult<Arc<dyn PriceTerminationFormula>> {
        Ok(Arc::new(Self {
            complement: true,
            ..Self::new(Arc::clone(self.delegate()), self.context.clone(), self.mode)
        }))
    }

    fn into_formula(self: Arc<Self>) -> Arc<dyn Formula> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{ConstantFormula, PriceListSourceFormula};
    use crate::price::{
        PriceIndexKey, PriceInnerRecordHandling, PriceRecord, ResolvedFilteredPriceRecords,
        SortingForm,
    };

    fn formula() -> PlainPriceTerminationFormula {
        let records = vec![PriceRecord::new(1, 1, 0, 10, 8), PriceRecord::new(2, 2, 0, 20, 16)];
        let source: Arc<dyn Formula> = Arc::new(PriceListSourceFormula::new(
            PriceIndexKey::new("basic", "EUR", PriceInnerRecordHandling::None),
            5,
            [1u32, 2].into_iter().collect(),
            Arc::new(ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)),
        ));
        PlainPriceTerminationFormula::new(
            source,
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
        )
    }

    #[test]
    fn test_returns_delegate_result() {
        let formula = formula();
        assert_eq!(formula.compute().unwrap().len(), 2);
        assert!(formula.records_filtered_out_by_predicate().unwrap().is_empty());
        assert_eq!(formula.operation_cost(), 0);
    }

    #[test]
    fn test_complement_is_empty() {
        let formula = formula();
        let complement = formula.clone_with_price_predicate_filtered_out_results().unwrap();
        assert!(complement.compute().unwrap().is_empty());
        assert_ne!(complement.content_hash(), formula.content_hash());
    }

    #[test]
    fn test_flattened_payload_materializes_records() {
        let formula = formula();
        let hash = formula.content_hash();
        let flattened = formula.to_serializable_formula(hash, &FormulaHasher::new()).unwrap();
        assert_eq!(flattened.price_records().len(), 2);
        assert_eq!(flattened.transactional_ids(), &[5]);
        assert!(formula.serializable_formula_size_estimate().unwrap() > 0);
    }

    #[test]
    fn test_clone_requires_single_delegate() {
        let formula = formula();
        let constant: Arc<dyn Formula> = Arc::new(ConstantFormula::new(RoaringBitmap::new()));
        assert!(formula.clone_with_inner_formulas(vec![constant.clone()]).is_ok());
        assert!(formula.clone_with_inner_formulas(vec![constant.clone(), constant]).is_err());
        assert!(formula.clone_with_inner_formulas(Vec::new()).is_err());
    }
}
