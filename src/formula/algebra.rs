//! Boolean algebra over entity id bitmaps

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use super::{
    expect_no_inner_formulas, hash_node, Formula, FormulaError, FormulaHasher, FormulaResult,
};

const CONSTANT_CLASS_ID: u64 = 0x3a5c_0001;
const AND_CLASS_ID: u64 = 0x3a5c_0002;
const OR_CLASS_ID: u64 = 0x3a5c_0003;
const NOT_CLASS_ID: u64 = 0x3a5c_0004;

const CONSTANT_OPERATION_COST: u64 = 1;
const AND_OPERATION_COST: u64 = 8;
const OR_OPERATION_COST: u64 = 12;
const NOT_OPERATION_COST: u64 = 10;

fn memoized<'a>(
    cell: &'a OnceLock<RoaringBitmap>,
    compute: impl FnOnce() -> FormulaResult<RoaringBitmap>,
) -> FormulaResult<&'a RoaringBitmap> {
    if let Some(result) = cell.get() {
        return Ok(result);
    }
    let computed = compute()?;
    Ok(cell.get_or_init(|| computed))
}

/// Fixed bitmap, optionally tied to an index version.
#[derive(Debug, Clone)]
pub struct ConstantFormula {
    bitmap: RoaringBitmap,
    transactional_id: Option<u64>,
    hash: OnceLock<u64>,
}

impl ConstantFormula {
    pub fn new(bitmap: RoaringBitmap) -> Self {
        Self {
            bitmap,
            transactional_id: None,
            hash: OnceLock::new(),
        }
    }

    /// Bitmap read from the index with version `transactional_id`.
    pub fn from_index(bitmap: RoaringBitmap, transactional_id: u64) -> Self {
        Self {
            transactional_id: Some(transactional_id),
            ..Self::new(bitmap)
        }
    }

    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }
}

impl Formula for ConstantFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        Ok(&self.bitmap)
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &[]
    }

    fn operation_cost(&self) -> u64 {
        CONSTANT_OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let hasher = FormulaHasher::new();
            let additional = match self.transactional_id {
                Some(id) => hasher.hash_longs(&[1, id]),
                None => hasher.hash_ints(self.bitmap.iter()),
            };
            hash_node(CONSTANT_CLASS_ID, additional, &[])
        })
    }

    fn gather_transactional_ids(&self) -> BTreeSet<u64> {
        self.transactional_id.into_iter().collect()
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        expect_no_inner_formulas(&inner_formulas)?;
        Ok(Arc::new(self.clone()))
    }
}

/// Intersection of all inner formulas.
#[derive(Debug)]
pub struct AndFormula {
    inner: Vec<Arc<dyn Formula>>,
    memoized: OnceLock<RoaringBitmap>,
    hash: OnceLock<u64>,
}

impl AndFormula {
    pub fn new(inner: Vec<Arc<dyn Formula>>) -> FormulaResult<Self> {
        if inner.is_empty() {
            return Err(FormulaError::premise("AND requires at least one inner formula"));
        }
        Ok(Self {
            inner,
            memoized: OnceLock::new(),
            hash: OnceLock::new(),
        })
    }
}

impl Formula for AndFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        memoized(&self.memoized, || {
            let mut inner = self.inner.iter();
            let mut result = match inner.next() {
                Some(first) => first.compute()?.clone(),
                None => RoaringBitmap::new(),
            };
            for formula in inner {
                if result.is_empty() {
                    break;
                }
                result &= formula.compute()?;
            }
            Ok(result)
        })
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    fn operation_cost(&self) -> u64 {
        AND_OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.inner
            .iter()
            .map(|formula| formula.estimated_cardinality())
            .min()
            .unwrap_or(0)
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| hash_node(AND_CLASS_ID, 0, &self.inner))
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        Ok(Arc::new(AndFormula::new(inner_formulas)?))
    }
}

/// Union of all inner formulas.
#[derive(Debug)]
pub struct OrFormula {
    inner: Vec<Arc<dyn Formula>>,
    memoized: OnceLock<RoaringBitmap>,
    hash: OnceLock<u64>,
}

impl OrFormula {
    pub fn new(inner: Vec<Arc<dyn Formula>>) -> FormulaResult<Self> {
        if inner.is_empty() {
            return Err(FormulaError::premise("OR requires at least one inner formula"));
        }
        Ok(Self {
            inner,
            memoized: OnceLock::new(),
            hash: OnceLock::new(),
        })
    }
}

impl Formula for OrFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        memoized(&self.memoized, || {
            let mut result = RoaringBitmap::new();
            for formula in &self.inner {
                result |= formula.compute()?;
            }
            Ok(result)
        })
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    fn operation_cost(&self) -> u64 {
        OR_OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.inner
            .iter()
            .fold(0u64, |sum, formula| sum.saturating_add(formula.estimated_cardinality()))
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| hash_node(OR_CLASS_ID, 0, &self.inner))
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        Ok(Arc::new(OrFormula::new(inner_formulas)?))
    }
}

/// Superset minus subtracted. Inner formulas are `[subtracted, superset]`.
#[derive(Debug)]
pub struct NotFormula {
    inner: Vec<Arc<dyn Formula>>,
    memoized: OnceLock<RoaringBitmap>,
    hash: OnceLock<u64>,
}

impl NotFormula {
    pub fn new(subtracted: Arc<dyn Formula>, superset: Arc<dyn Formula>) -> Self {
        Self {
            inner: vec![subtracted, superset],
            memoized: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    pub fn subtracted(&self) -> &Arc<dyn Formula> {
        &self.inner[0]
    }

    pub fn superset(&self) -> &Arc<dyn Formula> {
        &self.inner[1]
    }
}

impl Formula for NotFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        memoized(&self.memoized, || {
            let superset = self.superset().compute()?;
            if superset.is_empty() {
                return Ok(RoaringBitmap::new());
            }
            Ok(superset - self.subtracted().compute()?)
        })
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    /// Prices of subtracted entities never reach the result.
    fn price_relevant_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner[1..]
    }

    fn operation_cost(&self) -> u64 {
        NOT_OPERATION_COST
    }

    fn estimated_cardinality(&self) -> u64 {
        self.superset().estimated_cardinality()
    }

    fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| hash_node(NOT_CLASS_ID, 0, &self.inner))
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        match <[Arc<dyn Formula>; 2]>::try_from(inner_formulas) {
            Ok([subtracted, superset]) => Ok(Arc::new(NotFormula::new(subtracted, superset))),
            Err(_) => Err(FormulaError::premise(
                "NOT requires exactly subtracted and superset formulas",
            )),
        }
    }
}
