//! Amount range predicates

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::FormulaHasher;

use super::{PriceRecord, QueryPriceMode};

const NO_BOUND: u64 = u64::MAX;

/// Inclusive amount range; a missing bound is open.
///
/// Two predicates are equal when their bounds are equal. The description is
/// informational and takes no part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePredicate {
    from: Option<i64>,
    to: Option<i64>,
    description: Cow<'static, str>,
}

impl PricePredicate {
    /// Predicate accepting every amount.
    pub const NO_FILTER: PricePredicate = PricePredicate {
        from: None,
        to: None,
        description: Cow::Borrowed("NO_FILTER"),
    };

    pub fn between(from: Option<i64>, to: Option<i64>) -> Self {
        let description = match (from, to) {
            (Some(from), Some(to)) => format!("between {from} and {to}"),
            (Some(from), None) => format!("at least {from}"),
            (None, Some(to)) => format!("at most {to}"),
            (None, None) => return Self::NO_FILTER,
        };
        Self {
            from,
            to,
            description: Cow::Owned(description),
        }
    }

    pub fn from(&self) -> Option<i64> {
        self.from
    }

    pub fn to(&self) -> Option<i64> {
        self.to
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_no_filter(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn test(&self, amount: i64) -> bool {
        self.from.map_or(true, |from| amount >= from) && self.to.map_or(true, |to| amount <= to)
    }

    pub fn compute_hash(&self, hasher: &FormulaHasher) -> u64 {
        hasher.hash_longs(&[
            u64::from(self.from.is_some()),
            self.from.map_or(NO_BOUND, |from| from as u64),
            u64::from(self.to.is_some()),
            self.to.map_or(NO_BOUND, |to| to as u64),
        ])
    }
}

impl PartialEq for PricePredicate {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to
    }
}

impl Eq for PricePredicate {}

impl fmt::Display for PricePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Amount range applied to a price record in a query price mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecordPredicate {
    mode: QueryPriceMode,
    amount: PricePredicate,
}

impl PriceRecordPredicate {
    /// Predicate accepting every record.
    pub const ALL_RECORDS: PriceRecordPredicate = PriceRecordPredicate {
        mode: QueryPriceMode::WithTax,
        amount: PricePredicate::NO_FILTER,
    };

    pub fn new(mode: QueryPriceMode, amount: PricePredicate) -> Self {
        Self { mode, amount }
    }

    pub fn between(mode: QueryPriceMode, from: Option<i64>, to: Option<i64>) -> Self {
        Self::new(mode, PricePredicate::between(from, to))
    }

    pub fn mode(&self) -> QueryPriceMode {
        self.mode
    }

    pub fn amount_predicate(&self) -> &PricePredicate {
        &self.amount
    }

    pub fn from(&self) -> Option<i64> {
        self.amount.from()
    }

    pub fn to(&self) -> Option<i64> {
        self.amount.to()
    }

    pub fn is_all_records(&self) -> bool {
        self.amount.is_no_filter()
    }

    pub fn test(&self, record: &PriceRecord) -> bool {
        self.amount.test(record.amount(self.mode))
    }

    /// Every record-less predicate hashes alike regardless of mode.
    pub fn compute_hash(&self, hasher: &FormulaHasher) -> u64 {
        if self.is_all_records() {
            hasher.hash_longs(&[0])
        } else {
            hasher.hash_longs(&[self.mode.hash_value(), self.amount.compute_hash(hasher)])
        }
    }
}

impl fmt::Display for PriceRecordPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.mode, self.amount)
    }
}
