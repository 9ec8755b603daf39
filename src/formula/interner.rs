//! Sharing of equal termination formulas within a query

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::price::PriceEvaluationContext;

use super::PriceTerminationFormula;

type InternKey = (u64, PriceEvaluationContext);

/// Collapses termination formulas with equal content hash and evaluation
/// context to one shared instance, so their memoized result is computed once.
#[derive(Default)]
pub struct FormulaInterner {
    formulas: Mutex<HashMap<InternKey, Arc<dyn PriceTerminationFormula>>>,
}

impl FormulaInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance registered for `formula`'s identity, registering
    /// `formula` if there is none.
    pub fn intern(
        &self,
        formula: Arc<dyn PriceTerminationFormula>,
    ) -> Arc<dyn PriceTerminationFormula> {
        let key = (
            formula.content_hash(),
            formula.price_evaluation_context().clone(),
        );
        Arc::clone(self.lock().entry(key).or_insert(formula))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InternKey, Arc<dyn PriceTerminationFormula>>> {
        match self.formulas.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for FormulaInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaInterner")
            .field("formulas", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{ConstantFormula, Formula, PlainWithFilterPriceTerminationFormula};
    use crate::price::{PriceRecordPredicate, QueryPriceMode};

    fn termination(upper: i64) -> Arc<dyn PriceTerminationFormula> {
        let delegate: Arc<dyn Formula> = Arc::new(ConstantFormula::new([1u32].into_iter().collect()));
        Arc::new(PlainWithFilterPriceTerminationFormula::new(
            delegate,
            PriceEvaluationContext::unbounded(Vec::new()),
            QueryPriceMode::WithTax,
            PriceRecordPredicate::between(QueryPriceMode::WithTax, None, Some(upper)),
        ))
    }

    #[test]
    fn test_equal_formulas_share_instance() {
        let interner = FormulaInterner::new();
        let first = interner.intern(termination(10));
        let second = interner.intern(termination(10));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_different_formulas_are_kept_apart() {
        let interner = FormulaInterner::new();
        let first = interner.intern(termination(10));
        let second = interner.intern(termination(20));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(interner.len(), 2);
        interner.clear();
        assert!(interner.is_empty());
    }
}
