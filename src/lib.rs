//! catalogdb - query-execution core of a catalog database
//!
//! Two subsystems share this crate:
//! - price termination formulas, which reduce a formula tree over price
//!   indexes to the entities having a representative price that passes the
//!   query's price predicate
//! - the transactional diff layer, which stages writes to shared index
//!   objects per transaction and folds them into new immutable copies on commit
//!
//! Supporting modules carry versioning, bitmaps, pooled buffers,
//! configuration and observability.

pub mod bitmap;
pub mod config;
pub mod formula;
pub mod index;
pub mod observability;
pub mod performance;
pub mod price;
pub mod transactional;
pub mod version;

pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use formula::{
    price_termination_formula, CacheableFormula, FilteredPriceRecordAccessor, FlattenedFormula,
    Formula, FormulaError, FormulaResult, PriceTerminationFormula,
};
pub use transactional::{TransactionalError, TransactionalLayerMaintainer, TransactionalResult};
