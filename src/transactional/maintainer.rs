//! Per-transaction registry of diff layers

use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::observability::{log_event_with_fields, metrics, Event, ObservationScope};

use super::{
    TransactionalError, TransactionalLayerCreator, TransactionalLayerProducer,
    TransactionalLayerState, TransactionalLayerWrapper, TransactionalResult,
};

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Layers may be created.
    Open,
    /// Folding has begun; no new layers may be created.
    Committing,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LayerKey {
    kind: TypeId,
    id: u64,
}

impl LayerKey {
    fn of<C: TransactionalLayerCreator + 'static>(creator: &C) -> Self {
        Self {
            kind: TypeId::of::<C>(),
            id: creator.id(),
        }
    }
}

trait ErasedLayer: Send + Sync {
    fn state(&self) -> TransactionalLayerState;
    fn discard(&mut self, creator_type: &'static str, id: u64) -> TransactionalResult<()>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Send + Sync + 'static> ErasedLayer for TransactionalLayerWrapper<T> {
    fn state(&self) -> TransactionalLayerState {
        TransactionalLayerWrapper::state(self)
    }

    fn discard(&mut self, creator_type: &'static str, id: u64) -> TransactionalResult<()> {
        TransactionalLayerWrapper::discard(self, creator_type, id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

struct LayerSlot {
    creator_type: &'static str,
    id: u64,
    wrapper: Box<dyn ErasedLayer>,
}

impl LayerSlot {
    fn new<T: Send + Sync + 'static>(creator_type: &'static str, id: u64, layer: T) -> Self {
        Self {
            creator_type,
            id,
            wrapper: Box::new(TransactionalLayerWrapper::new(layer)),
        }
    }

    fn is_alive(&self) -> bool {
        self.wrapper.state() == TransactionalLayerState::Alive
    }

    fn mismatch(&self) -> TransactionalError {
        TransactionalError::LayerTypeMismatch {
            creator_type: self.creator_type,
            id: self.id,
        }
    }

    fn wrapper<T: 'static>(&self) -> TransactionalResult<&TransactionalLayerWrapper<T>> {
        self.wrapper
            .as_any()
            .downcast_ref::<TransactionalLayerWrapper<T>>()
            .ok_or_else(|| self.mismatch())
    }

    fn wrapper_mut<T: 'static>(&mut self) -> TransactionalResult<&mut TransactionalLayerWrapper<T>> {
        let mismatch = self.mismatch();
        self.wrapper
            .as_any_mut()
            .downcast_mut::<TransactionalLayerWrapper<T>>()
            .ok_or(mismatch)
    }

    fn into_wrapper<T: 'static>(self) -> TransactionalResult<TransactionalLayerWrapper<T>> {
        let mismatch = self.mismatch();
        self.wrapper
            .into_any()
            .downcast::<TransactionalLayerWrapper<T>>()
            .map(|wrapper| *wrapper)
            .map_err(|_| mismatch)
    }

    fn discard(&mut self) -> TransactionalResult<()> {
        self.wrapper.discard(self.creator_type, self.id)
    }

    fn describe(&self) -> String {
        format!("{}#{}", short_type_name(self.creator_type), self.id)
    }
}

fn short_type_name(name: &'static str) -> &'static str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Diff layers of one transaction.
///
/// Owned by the thread driving the transaction. A nested maintainer reads
/// through to its parent's layers but never writes into them: the first
/// write in the child starts from a copy of the parent's layer.
pub struct TransactionalLayerMaintainer {
    transaction_id: u64,
    layers: HashMap<LayerKey, LayerSlot>,
    parent: Option<Arc<TransactionalLayerMaintainer>>,
    phase: TransactionPhase,
    snapshotting: bool,
}

impl TransactionalLayerMaintainer {
    pub fn new(transaction_id: u64) -> Self {
        Self {
            transaction_id,
            layers: HashMap::new(),
            parent: None,
            phase: TransactionPhase::Open,
            snapshotting: false,
        }
    }

    /// Maintainer of a nested transaction reading through to `parent`.
    pub fn nested(parent: Arc<TransactionalLayerMaintainer>, transaction_id: u64) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(transaction_id)
        }
    }

    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn parent(&self) -> Option<&Arc<TransactionalLayerMaintainer>> {
        self.parent.as_ref()
    }

    /// Number of layers, folded ones included.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn alive_layer_count(&self) -> usize {
        self.layers.values().filter(|slot| slot.is_alive()).count()
    }

    fn ensure_open(&self) -> TransactionalResult<()> {
        match self.phase {
            TransactionPhase::Open => Ok(()),
            TransactionPhase::Committing | TransactionPhase::Committed => {
                Err(TransactionalError::AlreadyCommitted {
                    transaction_id: self.transaction_id,
                })
            }
            TransactionPhase::RolledBack => Err(TransactionalError::RolledBack {
                transaction_id: self.transaction_id,
            }),
        }
    }

    /// Alive layer of `creator`, looking into the parent when this
    /// transaction has none.
    pub fn get_transactional_memory_layer_if_exists<C>(&self, creator: &C) -> Option<&C::Layer>
    where
        C: TransactionalLayerCreator + 'static,
    {
        match self.layers.get(&LayerKey::of(creator)) {
            Some(slot) => slot
                .wrapper::<C::Layer>()
                .ok()
                .filter(|wrapper| wrapper.is_alive())
                .map(|wrapper| wrapper.item()),
            None => self
                .parent
                .as_ref()
                .and_then(|parent| parent.get_transactional_memory_layer_if_exists(creator)),
        }
    }

    /// Layer of `creator`, created on first use. Repeated calls return the same layer.
    pub fn get_or_create_transactional_memory_layer<C>(
        &mut self,
        creator: &C,
    ) -> TransactionalResult<&mut C::Layer>
    where
        C: TransactionalLayerCreator + 'static,
    {
        self.ensure_open()?;
        let parent = self.parent.clone();
        let slot = match self.layers.entry(LayerKey::of(creator)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let layer = parent
                    .as_ref()
                    .and_then(|parent| parent.get_transactional_memory_layer_if_exists(creator))
                    .cloned()
                    .unwrap_or_else(|| creator.create_layer());
                let slot = LayerSlot::new(type_name::<C>(), creator.id(), layer);
                metrics().increment_layers_created();
                let id = creator.id().to_string();
                log_event_with_fields(
                    Event::LayerCreated,
                    &[("creator", short_type_name(slot.creator_type)), ("id", &id)],
                );
                entry.insert(slot)
            }
        };
        let (creator_type, id) = (slot.creator_type, slot.id);
        let wrapper = slot.wrapper_mut::<C::Layer>()?;
        if !wrapper.is_alive() {
            return Err(TransactionalError::LayerAlreadyDiscarded { creator_type, id });
        }
        Ok(wrapper.item_mut())
    }

    /// Drops the layer of `creator` without folding it.
    pub fn remove_transactional_memory_layer_if_exists<C>(
        &mut self,
        creator: &C,
    ) -> TransactionalResult<Option<C::Layer>>
    where
        C: TransactionalLayerCreator + 'static,
    {
        let Some(slot) = self.layers.remove(&LayerKey::of(creator)) else {
            return Ok(None);
        };
        let description = slot.describe();
        let wrapper = slot.into_wrapper::<C::Layer>()?;
        metrics().increment_layers_removed();
        log_event_with_fields(Event::LayerRemoved, &[("layer", &description)]);
        if wrapper.is_alive() {
            Ok(Some(wrapper.into_item()))
        } else {
            Ok(None)
        }
    }

    /// Folds the layer of `producer` into a committed copy and discards it.
    ///
    /// Marks the commit as begun. Inside a snapshot started by
    /// `get_state_copy_with_committed_changes_without_discarding` the layer
    /// is left alive instead.
    pub fn get_state_copy_with_committed_changes<P>(
        &mut self,
        producer: &P,
    ) -> TransactionalResult<P::Output>
    where
        P: TransactionalLayerProducer + 'static,
    {
        if self.phase == TransactionPhase::RolledBack {
            return Err(TransactionalError::RolledBack {
                transaction_id: self.transaction_id,
            });
        }
        let discard = !self.snapshotting;
        if discard && self.phase == TransactionPhase::Open {
            self.phase = TransactionPhase::Committing;
        }
        self.fold(producer, discard)
    }

    /// Committed view of `producer` leaving every layer alive.
    ///
    /// Used for read-only snapshots; cannot be nested.
    pub fn get_state_copy_with_committed_changes_without_discarding<P>(
        &mut self,
        producer: &P,
    ) -> TransactionalResult<P::Output>
    where
        P: TransactionalLayerProducer + 'static,
    {
        if self.snapshotting {
            return Err(TransactionalError::ReentrantSnapshot);
        }
        if self.phase == TransactionPhase::RolledBack {
            return Err(TransactionalError::RolledBack {
                transaction_id: self.transaction_id,
            });
        }
        self.snapshotting = true;
        let result = self.fold(producer, false);
        self.snapshotting = false;
        result
    }

    fn fold<P>(&mut self, producer: &P, discard: bool) -> TransactionalResult<P::Output>
    where
        P: TransactionalLayerProducer + 'static,
    {
        let key = LayerKey::of(producer);
        let Some(mut slot) = self.layers.remove(&key) else {
            let inherited = self
                .parent
                .as_ref()
                .and_then(|parent| parent.get_transactional_memory_layer_if_exists(producer))
                .cloned();
            return producer.create_copy_with_merged_transactional_memory(inherited.as_ref(), self);
        };

        if !slot.is_alive() {
            let err = TransactionalError::LayerAlreadyDiscarded {
                creator_type: slot.creator_type,
                id: slot.id,
            };
            self.layers.insert(key, slot);
            return Err(err);
        }

        let result = match slot.wrapper::<P::Layer>() {
            Ok(wrapper) => {
                producer.create_copy_with_merged_transactional_memory(Some(wrapper.item()), self)
            }
            Err(err) => Err(err),
        };
        let result = match result {
            Ok(output) if discard => slot.discard().map(|_| output),
            other => other,
        };
        if result.is_ok() {
            metrics().increment_layers_folded();
            log_event_with_fields(Event::LayerFolded, &[("layer", &slot.describe())]);
        }
        self.layers.insert(key, slot);
        result
    }

    /// Fails when some layer was never folded or removed.
    pub fn verify_layer_was_fully_swept(&self) -> TransactionalResult<()> {
        let mut stale: Vec<String> = self
            .layers
            .values()
            .filter(|slot| slot.is_alive())
            .map(LayerSlot::describe)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        stale.sort();
        let layers = stale.join(", ");
        let count = stale.len().to_string();
        metrics().increment_stale_memory_failures();
        log_event_with_fields(
            Event::StaleMemoryDetected,
            &[("count", &count), ("layers", &layers)],
        );
        Err(TransactionalError::StaleTransactionalMemory {
            count: stale.len(),
            layers,
        })
    }

    /// Folds `root`, then verifies every layer was swept.
    pub fn commit<P>(&mut self, root: &P) -> TransactionalResult<P::Output>
    where
        P: TransactionalLayerProducer + 'static,
    {
        self.ensure_open()?;
        let transaction_id = self.transaction_id.to_string();
        let scope = ObservationScope::with_fields("COMMIT", &[("transaction_id", &transaction_id)]);
        self.phase = TransactionPhase::Committing;

        let result = self
            .get_state_copy_with_committed_changes(root)
            .and_then(|output| self.verify_layer_was_fully_swept().map(|_| output));

        match result {
            Ok(output) => {
                self.phase = TransactionPhase::Committed;
                metrics().increment_commits();
                let layers = self.layers.len().to_string();
                scope.complete_with_fields(&[("layers", &layers)]);
                Ok(output)
            }
            Err(err) => {
                scope.fail(&err.to_string());
                Err(err)
            }
        }
    }

    /// Throws every layer away.
    pub fn rollback(&mut self) {
        let discarded = self.alive_layer_count().to_string();
        let transaction_id = self.transaction_id.to_string();
        self.layers.clear();
        self.phase = TransactionPhase::RolledBack;
        metrics().increment_rollbacks();
        log_event_with_fields(
            Event::Rollback,
            &[("transaction_id", &transaction_id), ("discarded", &discarded)],
        );
    }
}

impl fmt::Debug for TransactionalLayerMaintainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalLayerMaintainer")
            .field("transaction_id", &self.transaction_id)
            .field("phase", &self.phase)
            .field("layers", &self.layers.len())
            .field("nested", &self.parent.is_some())
            .finish()
    }
}
