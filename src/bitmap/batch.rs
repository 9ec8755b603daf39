//! Batch iteration of a bitmap into a pooled buffer

use roaring::bitmap::Iter;
use roaring::RoaringBitmap;

use crate::performance::{PooledBuffer, SharedBufferPool};

/// Walks a bitmap in ascending batches copied into a scratch buffer.
///
/// The buffer is borrowed from a [`SharedBufferPool`] and returned when the
/// iterator is dropped.
pub struct BatchIterator<'a> {
    values: Iter<'a>,
    buffer: PooledBuffer<'a>,
    peek: usize,
}

impl<'a> BatchIterator<'a> {
    /// Iterate `bitmap` using a buffer from `pool`.
    pub fn new(bitmap: &'a RoaringBitmap, pool: &'a SharedBufferPool) -> Self {
        Self {
            values: bitmap.iter(),
            buffer: pool.obtain(),
            peek: 0,
        }
    }

    /// Fills the buffer with the next batch; `None` once the bitmap is exhausted.
    pub fn next_batch(&mut self) -> Option<&[u32]> {
        self.peek = 0;
        for slot in self.buffer.iter_mut() {
            match self.values.next() {
                Some(value) => {
                    *slot = value;
                    self.peek += 1;
                }
                None => break,
            }
        }
        if self.peek == 0 {
            None
        } else {
            Some(&self.buffer[..self.peek])
        }
    }

    /// Number of values in the current batch.
    pub fn peek(&self) -> usize {
        self.peek
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::BufferPoolConfig;

    #[test]
    fn test_batches_cover_bitmap_in_order() {
        let pool = SharedBufferPool::new(BufferPoolConfig {
            buffer_size: 3,
            max_pooled: 1,
        });
        let bitmap: RoaringBitmap = [1, 5, 9, 12, 40, 41, 100].into_iter().collect();

        let mut iterator = BatchIterator::new(&bitmap, &pool);
        let mut batches = Vec::new();
        while let Some(batch) = iterator.next_batch() {
            batches.push(batch.to_vec());
        }

        assert_eq!(batches, vec![vec![1, 5, 9], vec![12, 40, 41], vec![100]]);
    }

    #[test]
    fn test_empty_bitmap_yields_nothing() {
        let pool = SharedBufferPool::new(BufferPoolConfig::default());
        let bitmap = RoaringBitmap::new();
        let mut iterator = BatchIterator::new(&bitmap, &pool);
        assert!(iterator.next_batch().is_none());
        assert_eq!(iterator.peek(), 0);
    }

    #[test]
    fn test_buffer_released_after_iteration() {
        let pool = SharedBufferPool::new(BufferPoolConfig {
            buffer_size: 4,
            max_pooled: 2,
        });
        let bitmap: RoaringBitmap = (0..10).collect();
        {
            let mut iterator = BatchIterator::new(&bitmap, &pool);
            while iterator.next_batch().is_some() {}
        }
        assert_eq!(pool.available(), 1);
    }
}
