//! Transactional memory layers
//!
//! Mutable index objects never change in place inside a transaction. Each
//! change is recorded in a diff layer kept on the side by the transaction's
//! `TransactionalLayerMaintainer`, keyed by the owning object's type and id.
//! On commit the maintainer folds every diff into a fresh immutable copy of
//! its object; readers keep the snapshot they started with.
//!
//! Lifecycle of a layer:
//! - created on first write (`get_or_create_transactional_memory_layer`)
//! - folded on commit (`get_state_copy_with_committed_changes`) and discarded
//! - or removed without folding (`remove_transactional_memory_layer_if_exists`)
//!
//! A commit fails if any layer is still alive after the root was folded.

mod errors;
mod layer;
mod maintainer;

pub use errors::{TransactionalError, TransactionalResult};
pub use layer::{
    TransactionalLayerCreator, TransactionalLayerProducer, TransactionalLayerState,
    TransactionalLayerWrapper,
};
pub use maintainer::{TransactionPhase, TransactionalLayerMaintainer};
