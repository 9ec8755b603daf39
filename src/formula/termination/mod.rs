//! Price termination formulas
//!
//! A termination formula sits on top of a price formula tree and reduces it
//! to the entities that have a representative price passing the price
//! predicate. Entities rejected by the predicate are kept aside so that
//! histograms can be computed over the unfiltered population.
//!
//! Variants, chosen by the inner record handling in effect:
//! - `Plain` - no predicate, the delegate result as is
//! - `PlainWithFilter` - first price found in priority order
//! - `FirstVariant` - lowest of the per-inner-record winners
//! - `Sum` - sum of the per-inner-record winners
//!
//! For every variant `result | excluded == delegate` and the two are disjoint.

mod first_variant;
mod plain;
mod plain_filter;
mod sum;

pub use first_variant::FirstVariantPriceTerminationFormula;
pub use plain::PlainPriceTerminationFormula;
pub use plain_filter::PlainWithFilterPriceTerminationFormula;
pub use sum::SumPriceTerminationFormula;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use crate::bitmap::BatchIterator;
use crate::observability::{log_event_with_fields, metrics, Event};
use crate::performance::{MemoryLayout, SharedBufferPool};
use crate::price::{
    FilteredPriceRecords, PriceEvaluationContext, PriceInnerRecordHandling, PriceRecord,
    PriceRecordLookup, PriceRecordPredicate, QueryPriceMode, ResolvedFilteredPriceRecords,
    SortingForm,
};

use super::{
    transactional_id_hash, CacheableFormula, FilteredPriceRecordAccessor, FlattenedFormula,
    Formula, FormulaError, FormulaHasher, FormulaResult, PriceHandlingContainerFormula,
};

/// Capabilities shared by all termination variants.
pub trait PriceTerminationFormula: CacheableFormula + FilteredPriceRecordAccessor {
    fn price_evaluation_context(&self) -> &PriceEvaluationContext;

    fn price_predicate(&self) -> &PriceRecordPredicate;

    fn query_price_mode(&self) -> QueryPriceMode;

    /// Delegate entities the predicate rejected. Computes the formula if needed.
    fn records_filtered_out_by_predicate(&self) -> FormulaResult<&RoaringBitmap>;

    /// Formula whose result is exactly this formula's rejected entities.
    fn clone_with_price_predicate_filtered_out_results(
        &self,
    ) -> FormulaResult<Arc<dyn PriceTerminationFormula>>;

    fn into_formula(self: Arc<Self>) -> Arc<dyn Formula>;
}

/// Picks the termination variant for `handling`.
///
/// Without a predicate and without price sorting no price needs resolving,
/// so `None` handling terminates with the plain variant.
pub fn price_termination_formula(
    handling: PriceInnerRecordHandling,
    delegate: Arc<dyn Formula>,
    context: PriceEvaluationContext,
    mode: QueryPriceMode,
    predicate: PriceRecordPredicate,
    price_sort_requested: bool,
) -> FormulaResult<Arc<dyn PriceTerminationFormula>> {
    let container: Arc<dyn Formula> = Arc::new(PriceHandlingContainerFormula::new(handling, delegate));
    match handling {
        PriceInnerRecordHandling::None if predicate.is_all_records() && !price_sort_requested => {
            Ok(Arc::new(PlainPriceTerminationFormula::new(container, context, mode)))
        }
        PriceInnerRecordHandling::None => Ok(Arc::new(
            PlainWithFilterPriceTerminationFormula::new(container, context, mode, predicate),
        )),
        PriceInnerRecordHandling::LowestPrice => Ok(Arc::new(
            FirstVariantPriceTerminationFormula::new(container, context, mode, predicate),
        )),
        PriceInnerRecordHandling::Sum => Ok(Arc::new(SumPriceTerminationFormula::new(
            container, context, mode, predicate,
        ))),
        PriceInnerRecordHandling::Unknown => Err(FormulaError::premise(
            "price inner record handling must be known to resolve prices",
        )),
    }
}

/// Price sources of `formula` in priority order.
///
/// The search is shallow: a branch ends at its first node exposing price records.
pub fn find_price_sources(formula: &dyn Formula) -> FormulaResult<Vec<Arc<dyn FilteredPriceRecords>>> {
    let mut sources = Vec::new();
    collect_price_sources(formula, &mut sources)?;
    Ok(sources)
}

fn collect_price_sources(
    formula: &dyn Formula,
    sources: &mut Vec<Arc<dyn FilteredPriceRecords>>,
) -> FormulaResult<()> {
    if let Some(accessor) = formula.as_price_accessor() {
        sources.push(accessor.filtered_price_records()?);
        return Ok(());
    }
    for inner in formula.price_relevant_formulas() {
        collect_price_sources(inner.as_ref(), sources)?;
    }
    Ok(())
}

/// Lookups of all price sources, consulted in priority order.
pub(crate) struct PriceLookups<'a> {
    lookups: Vec<Box<dyn PriceRecordLookup + 'a>>,
}

impl<'a> PriceLookups<'a> {
    fn new(sources: &'a [Arc<dyn FilteredPriceRecords>]) -> Self {
        Self {
            lookups: sources.iter().map(|source| source.lookup()).collect(),
        }
    }

    /// First price of the entity in the first source that has one.
    pub(crate) fn first_price(&mut self, entity_primary_key: u32, hint: u32) -> Option<PriceRecord> {
        for lookup in &mut self.lookups {
            let mut first = None;
            lookup.for_each_price_of_entity(entity_primary_key, hint, &mut |record| {
                if first.is_none() {
                    first = Some(*record);
                }
            });
            if first.is_some() {
                return first;
            }
        }
        None
    }

    /// One price per inner record; the first accepted price found wins.
    pub(crate) fn inner_record_winners(
        &mut self,
        entity_primary_key: u32,
        hint: u32,
        accepts: &dyn Fn(&PriceRecord) -> bool,
        winners: &mut Vec<PriceRecord>,
    ) {
        winners.clear();
        for lookup in &mut self.lookups {
            lookup.for_each_price_of_entity(entity_primary_key, hint, &mut |record| {
                if accepts(record)
                    && !winners
                        .iter()
                        .any(|winner| winner.inner_record_id == record.inner_record_id)
                {
                    winners.push(*record);
                }
            });
        }
    }
}

/// How one entity resolved.
pub(crate) enum EntityPrice {
    Accepted(PriceRecord),
    Rejected(Option<PriceRecord>),
}

pub(crate) fn price_not_found(entity_primary_key: u32) -> FormulaError {
    let entity = entity_primary_key.to_string();
    log_event_with_fields(Event::PriceNotFound, &[("entity_primary_key", &entity)]);
    FormulaError::PriceNotFound { entity_primary_key }
}

#[derive(Debug)]
pub(crate) struct TerminationOutcome {
    pub(crate) result: RoaringBitmap,
    pub(crate) excluded: RoaringBitmap,
    pub(crate) records: Arc<ResolvedFilteredPriceRecords>,
}

fn resolve_entities<F>(
    variant: &'static str,
    entities: &RoaringBitmap,
    accept_all: bool,
    mut resolve: F,
) -> FormulaResult<TerminationOutcome>
where
    F: FnMut(u32, u32) -> FormulaResult<EntityPrice>,
{
    let mut result = RoaringBitmap::new();
    let mut excluded = RoaringBitmap::new();
    let mut records = Vec::new();

    let mut batches = BatchIterator::new(entities, SharedBufferPool::global());
    while let Some(batch) = batches.next_batch() {
        let hint = batch.last().copied().unwrap_or_default();
        for &entity in batch {
            match resolve(entity, hint)? {
                EntityPrice::Accepted(record) => {
                    result.insert(entity);
                    records.push(record);
                }
                EntityPrice::Rejected(record) if accept_all => {
                    result.insert(entity);
                    records.extend(record);
                }
                EntityPrice::Rejected(_) => {
                    excluded.insert(entity);
                }
            }
        }
    }

    metrics().record_termination(result.len(), excluded.len());
    let (resolved, rejected) = (result.len().to_string(), excluded.len().to_string());
    log_event_with_fields(
        Event::FormulaComputed,
        &[("formula", variant), ("result", &resolved), ("excluded", &rejected)],
    );
    Ok(TerminationOutcome {
        result,
        excluded,
        records: Arc::new(ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)),
    })
}

/// State shared by the price-resolving variants.
#[derive(Debug)]
pub(crate) struct TerminationCore {
    inner: Vec<Arc<dyn Formula>>,
    context: PriceEvaluationContext,
    mode: QueryPriceMode,
    predicate: PriceRecordPredicate,
    complement_of: Option<RoaringBitmap>,
    outcome: OnceLock<TerminationOutcome>,
    hash: OnceLock<u64>,
}

impl TerminationCore {
    pub(crate) fn new(
        delegate: Arc<dyn Formula>,
        context: PriceEvaluationContext,
        mode: QueryPriceMode,
        predicate: PriceRecordPredicate,
    ) -> Self {
        Self {
            inner: vec![delegate],
            context,
            mode,
            predicate,
            complement_of: None,
            outcome: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    /// Same parameters over a new delegate.
    pub(crate) fn with_delegate(&self, delegate: Arc<dyn Formula>) -> Self {
        Self {
            complement_of: self.complement_of.clone(),
            ..Self::new(delegate, self.context.clone(), self.mode, self.predicate.clone())
        }
    }

    /// Core accepting exactly the entities rejected by this one.
    pub(crate) fn complement(&self, excluded: &RoaringBitmap) -> Self {
        Self {
            complement_of: Some(excluded.clone()),
            ..Self::new(
                Arc::clone(self.delegate()),
                self.context.clone(),
                self.mode,
                PriceRecordPredicate::ALL_RECORDS,
            )
        }
    }

    pub(crate) fn inner(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    pub(crate) fn delegate(&self) -> &Arc<dyn Formula> {
        &self.inner[0]
    }

    pub(crate) fn context(&self) -> &PriceEvaluationContext {
        &self.context
    }

    pub(crate) fn mode(&self) -> QueryPriceMode {
        self.mode
    }

    pub(crate) fn predicate(&self) -> &PriceRecordPredicate {
        &self.predicate
    }

    fn entities(&self) -> FormulaResult<Cow<'_, RoaringBitmap>> {
        let delegate = self.delegate().compute()?;
        Ok(match &self.complement_of {
            Some(complement) => Cow::Owned(delegate & complement),
            None => Cow::Borrowed(delegate),
        })
    }

    /// Memoized outcome; `decide` resolves one entity.
    pub(crate) fn outcome<F>(&self, variant: &'static str, mut decide: F) -> FormulaResult<&TerminationOutcome>
    where
        F: FnMut(&mut PriceLookups<'_>, u32, u32) -> FormulaResult<EntityPrice>,
    {
        if let Some(outcome) = self.outcome.get() {
            return Ok(outcome);
        }
        let entities = self.entities()?;
        let sources = find_price_sources(self.delegate().as_ref())?;
        let mut lookups = PriceLookups::new(&sources);
        let outcome = resolve_entities(
            variant,
            &entities,
            self.complement_of.is_some(),
            |entity, hint| decide(&mut lookups, entity, hint),
        )?;
        Ok(self.outcome.get_or_init(|| outcome))
    }

    pub(crate) fn estimated_cardinality(&self) -> u64 {
        let inner = self
            .inner
            .iter()
            .fold(0u64, |sum, formula| sum.saturating_add(formula.estimated_cardinality()));
        match &self.complement_of {
            Some(complement) => inner.min(complement.len()),
            None => inner,
        }
    }

    /// Content hash over the shared parameters plus `variant_params`.
    pub(crate) fn content_hash(&self, class_id: u64, variant_params: &[u64]) -> u64 {
        *self.hash.get_or_init(|| {
            let hasher = FormulaHasher::new();
            let mut params = vec![
                self.context.compute_hash(&hasher),
                self.predicate.compute_hash(&hasher),
                self.mode.hash_value(),
                self.complement_of
                    .as_ref()
                    .map_or(0, |complement| hasher.hash_ints(complement.iter())),
            ];
            params.extend_from_slice(variant_params);
            super::hash_node(class_id, hasher.hash_longs(&params), &self.inner)
        })
    }

    pub(crate) fn flatten(
        &self,
        outcome: &TerminationOutcome,
        formula_hash: u64,
        hasher: &FormulaHasher,
        transactional_ids: BTreeSet<u64>,
    ) -> FlattenedFormula {
        FlattenedFormula::built(FlattenedFormula {
            formula_hash,
            transactional_id_hash: transactional_id_hash(&transactional_ids, hasher),
            transactional_ids: transactional_ids.into_iter().collect(),
            bitmap: outcome.result.clone(),
            price_records: Arc::clone(&outcome.records),
            records_filtered_out_by_predicate: outcome.excluded.clone(),
            price_evaluation_context: self.context.clone(),
            query_price_mode: self.mode,
            price_from: self.predicate.from(),
            price_to: self.predicate.to(),
        })
    }

    pub(crate) fn size_estimate(&self, outcome: &TerminationOutcome, transactional_ids: usize) -> usize {
        FlattenedFormula::estimate_size(
            &MemoryLayout::current(),
            transactional_ids,
            &outcome.result,
            outcome.records.len(),
            &outcome.excluded,
            &self.context,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{ConstantFormula, NotFormula, OrFormula, PriceListSourceFormula};
    use crate::price::PriceIndexKey;

    fn source(name: &str, records: Vec<PriceRecord>) -> Arc<dyn Formula> {
        let entity_ids = records.iter().map(|r| r.entity_primary_key).collect();
        Arc::new(PriceListSourceFormula::new(
            PriceIndexKey::new(name, "EUR", PriceInnerRecordHandling::None),
            1,
            entity_ids,
            Arc::new(ResolvedFilteredPriceRecords::new(records, SortingForm::EntityPk)),
        ))
    }

    fn context() -> PriceEvaluationContext {
        PriceEvaluationContext::unbounded(Vec::new())
    }

    #[test]
    fn test_sources_found_in_child_order() {
        let a = source("a", vec![PriceRecord::new(1, 1, 0, 10, 10)]);
        let b = source("b", vec![PriceRecord::new(2, 1, 0, 20, 20)]);
        let or: Arc<dyn Formula> = Arc::new(OrFormula::new(vec![a, b]).unwrap());
        let sources = find_price_sources(or.as_ref()).unwrap();
        assert_eq!(sources.len(), 2);
        let mut lookups = PriceLookups::new(&sources);
        assert_eq!(lookups.first_price(1, 1).map(|r| r.internal_price_id), Some(1));
    }

    #[test]
    fn test_subtracted_branch_is_not_a_source() {
        let a = source("a", vec![PriceRecord::new(1, 1, 0, 10, 10)]);
        let b = source("b", vec![PriceRecord::new(2, 2, 0, 20, 20)]);
        let not = NotFormula::new(a, b);
        let sources = find_price_sources(&not).unwrap();
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_winners_first_found_per_inner_record() {
        let records_a: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(1, 5, 1, 100, 100), PriceRecord::new(3, 5, 2, 50, 50)],
            SortingForm::EntityPk,
        ));
        let records_b: Arc<dyn FilteredPriceRecords> = Arc::new(ResolvedFilteredPriceRecords::new(
            vec![PriceRecord::new(2, 5, 1, 90, 90), PriceRecord::new(4, 5, 3, 10, 10)],
            SortingForm::EntityPk,
        ));
        let sources = vec![records_a, records_b];
        let mut lookups = PriceLookups::new(&sources);
        let mut winners = Vec::new();
        lookups.inner_record_winners(5, 5, &|_| true, &mut winners);
        let ids: Vec<u32> = winners.iter().map(|r| r.internal_price_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn test_selector_picks_variant() {
        let delegate: Arc<dyn Formula> = Arc::new(ConstantFormula::new(RoaringBitmap::new()));
        let all = PriceRecordPredicate::ALL_RECORDS;
        let bounded = PriceRecordPredicate::between(QueryPriceMode::WithTax, Some(1), None);

        let plain = price_termination_formula(
            PriceInnerRecordHandling::None, delegate.clone(), context(), QueryPriceMode::WithTax, all.clone(), false,
        )
        .unwrap();
        assert_eq!(plain.operation_cost(), 0);

        let sorted = price_termination_formula(
            PriceInnerRecordHandling::None, delegate.clone(), context(), QueryPriceMode::WithTax, all, true,
        )
        .unwrap();
        assert_eq!(sorted.operation_cost(), plain_filter::OPERATION_COST);

        let lowest = price_termination_formula(
            PriceInnerRecordHandling::LowestPrice, delegate.clone(), context(), QueryPriceMode::WithTax, bounded.clone(), false,
        )
        .unwrap();
        assert_eq!(lowest.operation_cost(), first_variant::OPERATION_COST);

        let sum = price_termination_formula(
            PriceInnerRecordHandling::Sum, delegate.clone(), context(), QueryPriceMode::WithTax, bounded.clone(), false,
        )
        .unwrap();
        assert_eq!(sum.operation_cost(), sum::OPERATION_COST);

        let unknown = price_termination_formula(
            PriceInnerRecordHandling::Unknown, delegate, context(), QueryPriceMode::WithTax, bounded, false,
        );
        assert!(matches!(unknown, Err(FormulaError::Premise(_))));
    }
}
