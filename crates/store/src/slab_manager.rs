//! Byte-granular slab allocator over a memory-mapped file.
//!
//! Slabs are variable-length regions addressed by absolute file offset.
//! Allocation only ever moves the high-water mark forward; slabs are never
//! reclaimed (rows are unlinked logically, not physically).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::memory_map::{Memory, MemoryMap};
use crate::{FileOffset, FILE_PREFIX_SIZE};

/// Slab allocator. The persisted payload size (the file's first 8 bytes)
/// is the absolute offset of the next free byte.
pub struct SlabManager {
    map: Arc<MemoryMap>,
    /// First byte of slab space: past the size cell and the bucket array.
    start: u64,
    /// In-memory high-water mark, persisted by `sync`.
    high_water: Mutex<u64>,
}

impl SlabManager {
    /// Create a manager whose slab space begins after `header_size` bytes
    /// of table header.
    pub fn new(map: Arc<MemoryMap>, header_size: u64) -> Self {
        let start = FILE_PREFIX_SIZE + header_size;
        Self { map, start, high_water: Mutex::new(start) }
    }

    /// Initialize a fresh file: zero slabs, persisted size written.
    pub fn create(&self) -> Result<()> {
        self.map.reserve(self.start)?;
        let mut high_water = self.high_water.lock();
        *high_water = self.start;
        self.map.access(0)?.write_u64(0, self.start);
        Ok(())
    }

    /// Load the persisted high-water mark from an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the persisted size lies before the
    /// slab space or beyond the physical file.
    pub fn start(&self) -> Result<()> {
        let persisted = self.map.access(0)?.read_u64(0);
        if persisted < self.start || persisted > self.map.size() {
            return Err(Error::Corrupted {
                reason: format!(
                    "slab payload size {persisted} outside [{}, {}]",
                    self.start,
                    self.map.size()
                ),
            });
        }
        *self.high_water.lock() = persisted;
        Ok(())
    }

    /// Persist the high-water mark into the file prefix.
    pub fn sync(&self) -> Result<()> {
        let high_water = self.high_water.lock();
        self.map.access(0)?.write_u64(0, *high_water);
        Ok(())
    }

    /// Reserve `size` bytes, returning the absolute offset of the new slab.
    ///
    /// Grows the file when needed; the allocation mutex is held across the
    /// growth so concurrent allocators see a consistent mark. No accessor
    /// may be held by the caller (growth takes the remap lock exclusively).
    pub fn new_slab(&self, size: u64) -> Result<FileOffset> {
        let mut high_water = self.high_water.lock();
        let position = *high_water;
        let required = position
            .checked_add(size)
            .ok_or_else(|| Error::Corrupted { reason: "slab allocation overflow".into() })?;
        self.map.reserve(required)?;
        *high_water = required;
        Ok(position)
    }

    /// The current payload size (next free offset).
    pub fn payload_size(&self) -> u64 {
        *self.high_water.lock()
    }

    /// Borrow the mapping at an absolute slab offset.
    pub fn get(&self, position: FileOffset) -> Result<Memory<'_>> {
        self.map.access(position)
    }

    /// The underlying mapping (shared with the table header).
    pub fn map(&self) -> &Arc<MemoryMap> {
        &self.map
    }
}
