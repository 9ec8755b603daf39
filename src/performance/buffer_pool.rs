//! Shared scratch-buffer pool
//!
//! Bitmap batch iteration needs a fixed-size integer buffer per running
//! computation. Buffers are recycled through a bounded pool:
//! - `obtain()` never blocks; an empty pool allocates a fresh buffer
//! - the returned guard gives the buffer back on drop, so release cannot be skipped
//! - at most `max_pooled` idle buffers are retained, extras are dropped

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};

use crate::observability::{log_event_with_fields, metrics, Event};

static GLOBAL: OnceLock<SharedBufferPool> = OnceLock::new();

/// Geometry of a buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of integers per buffer (also the batch size of bitmap iteration).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum number of idle buffers retained.
    #[serde(default = "default_max_pooled")]
    pub max_pooled: usize,
}

fn default_buffer_size() -> usize {
    512
}

fn default_max_pooled() -> usize {
    64
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_pooled: default_max_pooled(),
        }
    }
}

/// Bounded pool of fixed-size `u32` buffers, safe for concurrent use.
#[derive(Debug)]
pub struct SharedBufferPool {
    buffers: Mutex<Vec<Box<[u32]>>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl SharedBufferPool {
    /// Creates an empty pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(config.max_pooled)),
            buffer_size: config.buffer_size.max(1),
            max_pooled: config.max_pooled,
        }
    }

    /// The process-wide pool used by formula computation.
    pub fn global() -> &'static SharedBufferPool {
        GLOBAL.get_or_init(|| SharedBufferPool::new(BufferPoolConfig::default()))
    }

    /// Sets the geometry of the process-wide pool.
    ///
    /// Returns false if the pool was already in use; its geometry is then kept.
    pub fn install_global(config: BufferPoolConfig) -> bool {
        GLOBAL.set(SharedBufferPool::new(config)).is_ok()
    }

    /// Takes a buffer from the pool, allocating one if the pool is empty.
    pub fn obtain(&self) -> PooledBuffer<'_> {
        let recycled = self.lock().pop();
        let allocated = recycled.is_none();
        let buffer = recycled.unwrap_or_else(|| vec![0u32; self.buffer_size].into_boxed_slice());

        metrics().record_buffer_obtained(allocated);
        if allocated {
            log_event_with_fields(
                Event::BufferPoolExhausted,
                &[("buffer_size", &self.buffer_size.to_string())],
            );
        }

        PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Number of integers per buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently pooled.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    fn free(&self, buffer: Box<[u32]>) {
        let mut buffers = self.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Box<[u32]>>> {
        // the pooled buffers hold no invariants a panicking holder could break
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A buffer on loan from a [`SharedBufferPool`], returned on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a SharedBufferPool,
    buffer: Option<Box<[u32]>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u32] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.free(buffer);
        }
    }
}
