//! Observable engine events
//!
//! Events are explicit and typed; each maps to one stable log event name.

use std::fmt;

/// Observable events of the formula engine and the transactional layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Engine configuration applied
    ConfigApplied,

    // Formula evaluation
    /// A termination formula finished resolving prices
    FormulaComputed,
    /// A cache payload was built from a computed formula
    FlattenedFormulaBuilt,
    /// An entity had no price in any source (FATAL)
    PriceNotFound,

    // Transactional layer
    /// A diff layer was registered for an index object
    LayerCreated,
    /// A diff layer was folded into a new immutable copy
    LayerFolded,
    /// A diff layer was discarded without folding
    LayerRemoved,
    /// Diffs remained unfolded at commit
    StaleMemoryDetected,
    /// Transaction rolled back, all diffs discarded
    Rollback,

    // Supporting utilities
    /// The scratch buffer pool was empty and a fresh buffer was allocated
    BufferPoolExhausted,
    /// The object version sequence ran out of ids (FATAL)
    VersionOverflow,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigApplied => "CONFIG_APPLIED",
            Event::FormulaComputed => "FORMULA_COMPUTED",
            Event::FlattenedFormulaBuilt => "FLATTENED_FORMULA_BUILT",
            Event::PriceNotFound => "PRICE_NOT_FOUND",
            Event::LayerCreated => "LAYER_CREATED",
            Event::LayerFolded => "LAYER_FOLDED",
            Event::LayerRemoved => "LAYER_REMOVED",
            Event::StaleMemoryDetected => "STALE_MEMORY_DETECTED",
            Event::Rollback => "TRANSACTION_ROLLBACK",
            Event::BufferPoolExhausted => "BUFFER_POOL_EXHAUSTED",
            Event::VersionOverflow => "VERSION_OVERFLOW",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::PriceNotFound | Event::VersionOverflow)
    }

    /// Returns true for high-volume events logged at TRACE
    pub fn is_detail(&self) -> bool {
        matches!(
            self,
            Event::FormulaComputed
                | Event::FlattenedFormulaBuilt
                | Event::LayerCreated
                | Event::LayerFolded
                | Event::LayerRemoved
                | Event::BufferPoolExhausted
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
