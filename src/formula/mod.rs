//! Formula trees
//!
//! A formula is a lazily evaluated node producing a bitmap of entity ids.
//! Nodes are immutable once built; rewriting a tree builds new nodes with
//! `clone_with_inner_formulas`. Each node memoizes its own result.
//!
//! Price resolution flows bottom-up:
//! - `PriceListSourceFormula` leaves carry entity ids and price lookups of one price list
//! - boolean nodes (`AndFormula`, `OrFormula`, `NotFormula`) combine them
//! - `PriceHandlingContainerFormula` marks the inner record handling in effect
//! - exactly one termination formula reduces the tree to entities with a representative price
//!
//! Termination formulas are cacheable: their content hash together with the
//! transactional ids of the indexes they read identifies a `FlattenedFormula`
//! payload that can stand in for them.

mod algebra;
mod errors;
mod flattened;
mod handling;
mod hash;
mod interner;
mod price_source;
mod termination;

pub use algebra::{AndFormula, ConstantFormula, NotFormula, OrFormula};
pub use errors::{FormulaError, FormulaResult};
pub use flattened::FlattenedFormula;
pub use handling::PriceHandlingContainerFormula;
pub use hash::FormulaHasher;
pub use interner::FormulaInterner;
pub use price_source::PriceListSourceFormula;
pub use termination::{
    find_price_sources, price_termination_formula, FirstVariantPriceTerminationFormula,
    PlainPriceTerminationFormula, PlainWithFilterPriceTerminationFormula,
    PriceTerminationFormula, SumPriceTerminationFormula,
};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::price::FilteredPriceRecords;

/// A node of a formula tree.
pub trait Formula: fmt::Debug + Send + Sync {
    /// Result of the node, computed on first call and memoized.
    fn compute(&self) -> FormulaResult<&RoaringBitmap>;

    fn inner_formulas(&self) -> &[Arc<dyn Formula>];

    /// Children that may supply prices to a termination formula above.
    fn price_relevant_formulas(&self) -> &[Arc<dyn Formula>] {
        self.inner_formulas()
    }

    /// Cost of processing one result entity in this node.
    fn operation_cost(&self) -> u64;

    /// Upper estimate of the result size, available without computing.
    fn estimated_cardinality(&self) -> u64;

    /// Cost of the whole subtree, available without computing.
    fn estimated_cost(&self) -> u64 {
        self.inner_formulas()
            .iter()
            .fold(0u64, |cost, inner| cost.saturating_add(inner.estimated_cost()))
            .saturating_add(
                self.estimated_cardinality()
                    .saturating_mul(self.operation_cost()),
            )
    }

    /// Hash of the node variant, its parameters and its children.
    fn content_hash(&self) -> u64;

    /// Versions of the indexes the subtree reads, sorted and distinct.
    fn gather_transactional_ids(&self) -> BTreeSet<u64> {
        self.inner_formulas()
            .iter()
            .flat_map(|inner| inner.gather_transactional_ids())
            .collect()
    }

    /// Same node over new children.
    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>>;

    fn as_price_accessor(&self) -> Option<&dyn FilteredPriceRecordAccessor> {
        None
    }
}

/// A node that exposes the price records behind its result.
pub trait FilteredPriceRecordAccessor {
    fn filtered_price_records(&self) -> FormulaResult<Arc<dyn FilteredPriceRecords>>;
}

/// A node whose result can be flattened into a cache payload.
pub trait CacheableFormula: Formula {
    /// Computes the node and captures its result as a payload keyed by `formula_hash`.
    fn to_serializable_formula(
        &self,
        formula_hash: u64,
        hasher: &FormulaHasher,
    ) -> FormulaResult<FlattenedFormula>;

    /// Retained size of the payload `to_serializable_formula` would build.
    fn serializable_formula_size_estimate(&self) -> FormulaResult<usize>;
}

/// Hash of a sorted, distinct transactional id set.
pub fn transactional_id_hash(ids: &BTreeSet<u64>, hasher: &FormulaHasher) -> u64 {
    hasher.hash_transactional_ids(ids)
}

pub(crate) fn hash_node(class_id: u64, additional_hash: u64, inner: &[Arc<dyn Formula>]) -> u64 {
    let children: Vec<u64> = inner.iter().map(|formula| formula.content_hash()).collect();
    FormulaHasher::new().hash_formula(class_id, additional_hash, &children)
}

pub(crate) fn expect_no_inner_formulas(inner_formulas: &[Arc<dyn Formula>]) -> FormulaResult<()> {
    if inner_formulas.is_empty() {
        Ok(())
    } else {
        Err(FormulaError::premise("leaf formula cannot have inner formulas"))
    }
}

pub(crate) fn expect_single_inner_formula(
    mut inner_formulas: Vec<Arc<dyn Formula>>,
) -> FormulaResult<Arc<dyn Formula>> {
    match inner_formulas.pop() {
        Some(delegate) if inner_formulas.is_empty() => Ok(delegate),
        _ => Err(FormulaError::premise(
            "expected exactly single delegate inner formula",
        )),
    }
}
