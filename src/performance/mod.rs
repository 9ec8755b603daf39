//! Performance support
//!
//! - Scratch-buffer reuse for bitmap batch iteration
//! - Memory layout model for cache payload size estimates
//!
//! Nothing here changes results; both pieces can be reconfigured at startup.

mod buffer_pool;
mod memory_layout;

pub use buffer_pool::{BufferPoolConfig, PooledBuffer, SharedBufferPool};
pub use memory_layout::{MemoryLayout, INT_SIZE, LONG_SIZE};
