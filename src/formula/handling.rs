//! Inner record handling marker

use std::sync::{Arc, OnceLock};

use roaring::RoaringBitmap;

use crate::price::PriceInnerRecordHandling;

use super::{expect_single_inner_formula, hash_node, Formula, FormulaResult};

const CLASS_ID: u64 = 0x3a5c_0020;

/// Passes its delegate through, recording how inner record prices combine.
#[derive(Debug)]
pub struct PriceHandlingContainerFormula {
    handling: PriceInnerRecordHandling,
    inner: Vec<Arc<dyn Formula>>,
    hash: OnceLock<u64>,
}

impl PriceHandlingContainerFormula {
    pub fn new(handling: PriceInnerRecordHandling, delegate: Arc<dyn Formula>) -> Self {
        Self {
            handling,
            inner: vec![delegate],
            hash: OnceLock::new(),
        }
    }

    pub fn handling(&self) -> PriceInnerRecordHandling {
        self.handling
    }

    pub fn delegate(&self) -> &Arc<dyn Formula> {
        &self.inner[0]
    }
}

impl Formula for PriceHandlingContainerFormula {
    fn compute(&self) -> FormulaResult<&RoaringBitmap> {
        self.delegate().compute()
    }

    fn inner_formulas(&self) -> &[Arc<dyn Formula>] {
        &self.inner
    }

    fn operation_cost(&self) -> u64 {
        0
    }

    fn estimated_cardinality(&self) -> u64 {
        self.delegate().estimated_cardinality()
    }

    fn content_hash(&self) -> u64 {
        *self
            .hash
            .get_or_init(|| hash_node(CLASS_ID, self.handling.hash_value(), &self.inner))
    }

    fn clone_with_inner_formulas(
        &self,
        inner_formulas: Vec<Arc<dyn Formula>>,
    ) -> FormulaResult<Arc<dyn Formula>> {
        let delegate = expect_single_inner_formula(inner_formulas)?;
        Ok(Arc::new(PriceHandlingContainerFormula::new(self.handling, delegate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::ConstantFormula;

    #[test]
    fn test_passes_delegate_through() {
        let delegate: Arc<dyn Formula> = Arc::new(ConstantFormula::new([1u32, 2].into_iter().collect()));
        let container = PriceHandlingContainerFormula::new(PriceInnerRecordHandling::Sum, delegate.clone());
        assert_eq!(container.compute().unwrap(), delegate.compute().unwrap());
        assert_eq!(container.estimated_cardinality(), 2);
        assert_eq!(container.handling(), PriceInnerRecordHandling::Sum);
    }

    #[test]
    fn test_handling_changes_hash() {
        let delegate: Arc<dyn Formula> = Arc::new(ConstantFormula::new([1u32].into_iter().collect()));
        let sum = PriceHandlingContainerFormula::new(PriceInnerRecordHandling::Sum, delegate.clone());
        let lowest = PriceHandlingContainerFormula::new(PriceInnerRecordHandling::LowestPrice, delegate);
        assert_ne!(sum.content_hash(), lowest.content_hash());
    }

    #[test]
    fn test_clone_requires_single_delegate() {
        let delegate: Arc<dyn Formula> = Arc::new(ConstantFormula::new(RoaringBitmap::new()));
        let container = PriceHandlingContainerFormula::new(PriceInnerRecordHandling::None, delegate.clone());
        assert!(container.clone_with_inner_formulas(vec![delegate.clone(), delegate]).is_err());
    }
}
