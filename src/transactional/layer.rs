//! Layer creator/producer contracts and the layer wrapper

use super::{TransactionalError, TransactionalLayerMaintainer, TransactionalResult};

/// An object that records its transactional changes in a diff layer.
///
/// Layers are keyed by the creator's type and `id()`, so ids only need to be
/// unique among instances of one type.
pub trait TransactionalLayerCreator {
    /// Diff recorded on the side of the object.
    type Layer: Clone + Send + Sync + 'static;

    fn id(&self) -> u64;

    fn create_layer(&self) -> Self::Layer;
}

/// A creator able to fold its layer into a new committed copy of itself.
pub trait TransactionalLayerProducer: TransactionalLayerCreator {
    type Output;

    /// Builds the committed copy from `layer` (`None` when the object was not
    /// changed directly). Nested transactional objects are folded through
    /// `maintainer` so their layers are swept as well.
    fn create_copy_with_merged_transactional_memory(
        &self,
        layer: Option<&Self::Layer>,
        maintainer: &mut TransactionalLayerMaintainer,
    ) -> TransactionalResult<Self::Output>;
}

/// Lifecycle of a layer; `Discarded` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionalLayerState {
    Alive,
    Discarded,
}

/// Holds one diff layer and its lifecycle state.
#[derive(Debug, Clone)]
pub struct TransactionalLayerWrapper<T> {
    item: T,
    state: TransactionalLayerState,
}

impl<T> TransactionalLayerWrapper<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            state: TransactionalLayerState::Alive,
        }
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn item_mut(&mut self) -> &mut T {
        &mut self.item
    }

    pub fn state(&self) -> TransactionalLayerState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == TransactionalLayerState::Alive
    }

    /// Marks the layer as consumed. Discarding twice is a programming error.
    pub fn discard(&mut self, creator_type: &'static str, id: u64) -> TransactionalResult<()> {
        if self.state == TransactionalLayerState::Discarded {
            return Err(TransactionalError::LayerAlreadyDiscarded { creator_type, id });
        }
        self.state = TransactionalLayerState::Discarded;
        Ok(())
    }

    pub fn into_item(self) -> T {
        self.item
    }
}
