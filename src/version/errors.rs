//! Version sequence errors

use thiserror::Error;

/// Raised once the version counter has reached `u64::MAX`.
///
/// The condition is permanent: the sequence never wraps and never resumes.
/// Reusing an id could make two different index versions hash to the same
/// cache key, so the process must stop accepting mutations instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("object version sequence exhausted at {last_issued}; no further mutations can be accepted")]
pub struct VersionOverflowError {
    /// Last id the sequence handed out before exhaustion.
    pub last_issued: u64,
}

impl VersionOverflowError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        "CATALOG_VERSION_OVERFLOW"
    }

    /// Overflow is always fatal.
    pub fn is_fatal(&self) -> bool {
        true
    }
}
