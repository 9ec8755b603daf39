//! Memory layout constants for cache admission
//!
//! The external cache decides whether a computed formula is worth keeping
//! by comparing its payload size with its computation cost. Payload size is
//! estimated from a fixed model of how the payload would be laid out in
//! memory: an object header per object, an array header per array and a
//! fixed reference width.
//!
//! The constants only steer admission heuristics. They never influence
//! formula results, so a deployment may substitute its own model freely.

use std::sync::RwLock;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

/// Width of a 64-bit primitive.
pub const LONG_SIZE: usize = 8;
/// Width of a 32-bit primitive.
pub const INT_SIZE: usize = 4;

static CURRENT: RwLock<MemoryLayout> = RwLock::new(MemoryLayout::DEFAULT);

/// Per-field memory layout model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLayout {
    /// Bytes taken by the header of every object.
    #[serde(default = "default_object_header")]
    pub object_header: usize,
    /// Bytes taken by the header of every array.
    #[serde(default = "default_array_base")]
    pub array_base: usize,
    /// Bytes taken by one reference.
    #[serde(default = "default_reference_size")]
    pub reference_size: usize,
}

fn default_object_header() -> usize {
    MemoryLayout::DEFAULT.object_header
}

fn default_array_base() -> usize {
    MemoryLayout::DEFAULT.array_base
}

fn default_reference_size() -> usize {
    MemoryLayout::DEFAULT.reference_size
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl MemoryLayout {
    /// 64-bit runtime with compressed references.
    pub const DEFAULT: Self = Self {
        object_header: 16,
        array_base: 16,
        reference_size: 4,
    };

    /// Layout currently used by size estimates.
    pub fn current() -> Self {
        match CURRENT.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace the layout used by size estimates.
    pub fn install(layout: Self) {
        match CURRENT.write() {
            Ok(mut guard) => *guard = layout,
            Err(poisoned) => *poisoned.into_inner() = layout,
        }
    }

    /// Size of an object holding `field_bytes` of fields, 8-byte aligned.
    pub fn object_size(&self, field_bytes: usize) -> usize {
        align(self.object_header + field_bytes)
    }

    /// Size of an array of `len` elements of `element_size` bytes, 8-byte aligned.
    pub fn array_size(&self, len: usize, element_size: usize) -> usize {
        align(self.array_base + len * element_size)
    }

    /// Size of a bitmap object: wrapper object plus its compressed containers.
    pub fn bitmap_size(&self, bitmap: &RoaringBitmap) -> usize {
        self.object_size(self.reference_size) + bitmap.serialized_size()
    }
}

fn align(size: usize) -> usize {
    (size + 7) & !7
}
