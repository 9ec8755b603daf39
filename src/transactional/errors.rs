//! Transactional layer errors

use thiserror::Error;

use crate::version::VersionOverflowError;

/// Result type for transactional operations
pub type TransactionalResult<T> = Result<T, TransactionalError>;

/// Transactional errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionalError {
    #[error("stale transactional memory: {count} layer(s) were never folded: {layers}")]
    StaleTransactionalMemory { count: usize, layers: String },

    #[error("transaction {transaction_id} already committed, no new layers can be created")]
    AlreadyCommitted { transaction_id: u64 },

    #[error("transaction {transaction_id} was rolled back")]
    RolledBack { transaction_id: u64 },

    #[error("layer of {creator_type}#{id} was already discarded")]
    LayerAlreadyDiscarded { creator_type: &'static str, id: u64 },

    #[error("layer of {creator_type}#{id} holds a different layer type")]
    LayerTypeMismatch { creator_type: &'static str, id: u64 },

    #[error("state copy without discarding cannot be nested")]
    ReentrantSnapshot,

    #[error(transparent)]
    VersionOverflow(#[from] VersionOverflowError),
}

impl TransactionalError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            TransactionalError::StaleTransactionalMemory { .. } => "CATALOG_STALE_TRANSACTIONAL_MEMORY",
            TransactionalError::AlreadyCommitted { .. } => "CATALOG_TRANSACTION_COMMITTED",
            TransactionalError::RolledBack { .. } => "CATALOG_TRANSACTION_ROLLED_BACK",
            TransactionalError::LayerAlreadyDiscarded { .. } => "CATALOG_LAYER_DISCARDED",
            TransactionalError::LayerTypeMismatch { .. } => "CATALOG_LAYER_TYPE_MISMATCH",
            TransactionalError::ReentrantSnapshot => "CATALOG_REENTRANT_SNAPSHOT",
            TransactionalError::VersionOverflow(err) => err.code(),
        }
    }

    /// Fatal errors leave the process unable to accept further mutations.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransactionalError::VersionOverflow(_))
    }
}
