//! Formula evaluation errors

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = Result<T, FormulaError>;

/// Formula errors
///
/// Any error raised while computing a formula fails the whole query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("price for entity with primary key {entity_primary_key} unexpectedly not found")]
    PriceNotFound { entity_primary_key: u32 },

    #[error("summed price of entity with primary key {entity_primary_key} overflows")]
    PriceOverflow { entity_primary_key: u32 },

    #[error("formula premise violated: {0}")]
    Premise(String),

    #[error("flattened formula serialization failed: {0}")]
    Serialization(String),
}

impl FormulaError {
    pub(crate) fn premise(message: impl Into<String>) -> Self {
        FormulaError::Premise(message.into())
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FormulaError::PriceNotFound { .. } => "CATALOG_PRICE_NOT_FOUND",
            FormulaError::PriceOverflow { .. } => "CATALOG_PRICE_OVERFLOW",
            FormulaError::Premise(_) => "CATALOG_FORMULA_PREMISE",
            FormulaError::Serialization(_) => "CATALOG_FORMULA_SERIALIZATION",
        }
    }

    /// A missing price means the indexes are inconsistent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FormulaError::PriceNotFound { .. })
    }
}

impl From<serde_json::Error> for FormulaError {
    fn from(err: serde_json::Error) -> Self {
        FormulaError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_not_found() {
        let err = FormulaError::PriceNotFound {
            entity_primary_key: 42,
        };
        assert!(err.is_fatal());
        assert_eq!(err.code(), "CATALOG_PRICE_NOT_FOUND");
        assert_eq!(
            err.to_string(),
            "price for entity with primary key 42 unexpectedly not found"
        );
    }

    #[test]
    fn test_price_overflow() {
        let err = FormulaError::PriceOverflow {
            entity_primary_key: 7,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "CATALOG_PRICE_OVERFLOW");
    }

    #[test]
    fn test_premise_is_not_fatal() {
        let err = FormulaError::premise("expected exactly one delegate formula");
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "CATALOG_FORMULA_PREMISE");
    }
}
