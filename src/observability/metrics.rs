//! Metrics registry for the query core
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe, relaxed atomics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of operational counters.
///
/// Relaxed ordering is enough: counters are observed, never used to
/// coordinate threads.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    formulas_computed: AtomicU64,
    entities_resolved: AtomicU64,
    entities_excluded_by_predicate: AtomicU64,
    flattened_formulas_built: AtomicU64,
    layers_created: AtomicU64,
    layers_folded: AtomicU64,
    layers_removed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    stale_memory_failures: AtomicU64,
    buffers_obtained: AtomicU64,
    buffers_allocated: AtomicU64,
    version_overflows: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Formula metrics

    /// A termination formula resolved its prices
    pub fn record_termination(&self, resolved: u64, excluded: u64) {
        self.formulas_computed.fetch_add(1, Ordering::Relaxed);
        self.entities_resolved.fetch_add(resolved, Ordering::Relaxed);
        self.entities_excluded_by_predicate
            .fetch_add(excluded, Ordering::Relaxed);
    }

    /// A cache payload was built
    pub fn increment_flattened_formulas(&self) {
        self.flattened_formulas_built.fetch_add(1, Ordering::Relaxed);
    }

    // Transactional layer metrics

    /// A diff layer was created
    pub fn increment_layers_created(&self) {
        self.layers_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A diff layer was folded
    pub fn increment_layers_folded(&self) {
        self.layers_folded.fetch_add(1, Ordering::Relaxed);
    }

    /// A diff layer was discarded without folding
    pub fn increment_layers_removed(&self) {
        self.layers_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// A transaction committed
    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// A transaction rolled back
    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// A commit found unfolded diffs
    pub fn increment_stale_memory_failures(&self) {
        self.stale_memory_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Supporting utilities

    /// A scratch buffer was handed out; `allocated` if the pool was empty
    pub fn record_buffer_obtained(&self, allocated: bool) {
        self.buffers_obtained.fetch_add(1, Ordering::Relaxed);
        if allocated {
            self.buffers_allocated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The version sequence refused an id
    pub fn increment_version_overflows(&self) {
        self.version_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            formulas_computed: self.formulas_computed.load(Ordering::Relaxed),
            entities_resolved: self.entities_resolved.load(Ordering::Relaxed),
            entities_excluded_by_predicate: self
                .entities_excluded_by_predicate
                .load(Ordering::Relaxed),
            flattened_formulas_built: self.flattened_formulas_built.load(Ordering::Relaxed),
            layers_created: self.layers_created.load(Ordering::Relaxed),
            layers_folded: self.layers_folded.load(Ordering::Relaxed),
            layers_removed: self.layers_removed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            stale_memory_failures: self.stale_memory_failures.load(Ordering::Relaxed),
            buffers_obtained: self.buffers_obtained.load(Ordering::Relaxed),
            buffers_allocated: self.buffers_allocated.load(Ordering::Relaxed),
            version_overflows: self.version_overflows.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub formulas_computed: u64,
    pub entities_resolved: u64,
    pub entities_excluded_by_predicate: u64,
    pub flattened_formulas_built: u64,
    pub layers_created: u64,
    pub layers_folded: u64,
    pub layers_removed: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub stale_memory_failures: u64,
    pub buffers_obtained: u64,
    pub buffers_allocated: u64,
    pub version_overflows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.formulas_computed, 0);
        assert_eq!(snapshot.layers_created, 0);
        assert_eq!(snapshot.buffers_obtained, 0);
    }

    #[test]
    fn test_record_termination() {
        let registry = MetricsRegistry::new();
        registry.record_termination(10, 3);
        registry.record_termination(5, 0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.formulas_computed, 2);
        assert_eq!(snapshot.entities_resolved, 15);
        assert_eq!(snapshot.entities_excluded_by_predicate, 3);
    }

    #[test]
    fn test_buffer_counters() {
        let registry = MetricsRegistry::new();
        registry.record_buffer_obtained(true);
        registry.record_buffer_obtained(false);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.buffers_obtained, 2);
        assert_eq!(snapshot.buffers_allocated, 1);
    }

    #[test]
    fn test_to_json_is_valid() {
        let registry = MetricsRegistry::new();
        registry.increment_layers_created();
        registry.increment_layers_folded();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["layers_created"], 1);
        assert_eq!(parsed["layers_folded"], 1);
    }
}
