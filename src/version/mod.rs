//! Object version identities
//!
//! Every mutable index object and every immutable copy produced by a commit
//! carries a process-unique 64-bit version id. The ids double as:
//! - the numeric half of the transactional layer key
//! - the transactional ids gathered by formulas for cache keys
//!
//! Ids are unique only within one process lifetime.

mod errors;
mod sequence;

pub use errors::VersionOverflowError;
pub use sequence::{next_version_id, ObjectVersionSequence};
