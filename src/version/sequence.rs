//! ObjectVersionSequence - lock-free monotonic id source
//!
//! - Strictly increasing within one process
//! - Safe under arbitrary concurrency (single atomic, CAS loop)
//! - Stops permanently at `u64::MAX`

use std::sync::atomic::{AtomicU64, Ordering};

use super::VersionOverflowError;
use crate::observability::{log_event_with_fields, metrics, Event};

/// The process-wide sequence used by all transactional index objects.
static SEQUENCE: ObjectVersionSequence = ObjectVersionSequence::new();

/// Issue the next process-wide version id.
pub fn next_version_id() -> Result<u64, VersionOverflowError> {
    SEQUENCE.next_id()
}

/// Monotonically increasing 64-bit counter.
///
/// The counter holds the last issued id. `u64::MAX` is the exhausted state:
/// it is never issued and, once reached, every call fails.
#[derive(Debug)]
pub struct ObjectVersionSequence {
    last_issued: AtomicU64,
}

impl ObjectVersionSequence {
    /// Creates a sequence whose first id is `1`.
    pub const fn new() -> Self {
        Self {
            last_issued: AtomicU64::new(0),
        }
    }

    /// Creates a sequence that resumes after `last_issued`.
    ///
    /// Mostly useful in tests that need to drive the counter to its limit.
    pub const fn starting_after(last_issued: u64) -> Self {
        Self {
            last_issued: AtomicU64::new(last_issued),
        }
    }

    /// Returns the next id, or a permanent overflow error.
    pub fn next_id(&self) -> Result<u64, VersionOverflowError> {
        let previous = self
            .last_issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(1).filter(|next| *next != u64::MAX)
            });

        match previous {
            Ok(previous) => Ok(previous + 1),
            Err(current) => {
                // park the counter at the exhausted state so it never recovers
                self.last_issued.store(u64::MAX, Ordering::Release);
                metrics().increment_version_overflows();
                log_event_with_fields(
                    Event::VersionOverflow,
                    &[("last_issued", &current.to_string())],
                );
                Err(VersionOverflowError {
                    last_issued: current.min(u64::MAX - 1),
                })
            }
        }
    }

    /// Returns the last issued id without advancing.
    pub fn last_issued(&self) -> u64 {
        self.last_issued.load(Ordering::Acquire)
    }

    /// Returns true once the sequence refuses to issue ids.
    pub fn is_exhausted(&self) -> bool {
        self.last_issued() >= u64::MAX - 1
    }
}

impl Default for ObjectVersionSequence {
    fn default() -> Self {
        Self::new()
    }
}
