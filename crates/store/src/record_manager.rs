//! Fixed-size record allocator over a memory-mapped file.
//!
//! Records are addressed by a 32-bit index. The record count is persisted
//! after the table header; `set_count` exists for the one legitimate
//! logical shrink in the system — truncating a positional block index
//! during reorganization.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::memory_map::{Memory, MemoryMap};
use crate::{RecordIndex, FILE_PREFIX_SIZE};

/// Size of the persisted record-count cell.
const COUNT_SIZE: u64 = 4;

/// Record allocator with a persisted count.
pub struct RecordManager {
    map: Arc<MemoryMap>,
    /// Offset of the count cell: past the size cell and the bucket array.
    count_offset: u64,
    record_size: u64,
    count: Mutex<RecordIndex>,
}

impl RecordManager {
    /// Create a manager for `record_size`-byte records following
    /// `header_size` bytes of table header.
    pub fn new(map: Arc<MemoryMap>, header_size: u64, record_size: u64) -> Self {
        debug_assert!(record_size > 0);
        Self {
            map,
            count_offset: FILE_PREFIX_SIZE + header_size,
            record_size,
            count: Mutex::new(0),
        }
    }

    fn records_start(&self) -> u64 {
        self.count_offset + COUNT_SIZE
    }

    fn record_offset(&self, index: RecordIndex) -> u64 {
        self.records_start() + u64::from(index) * self.record_size
    }

    /// Initialize a fresh file: zero records, counters written.
    pub fn create(&self) -> Result<()> {
        self.map.reserve(self.records_start())?;
        let mut count = self.count.lock();
        *count = 0;
        let memory = self.map.access(0)?;
        memory.write_u64(0, self.records_start());
        memory.write_u32(self.count_offset as usize, 0);
        Ok(())
    }

    /// Load the persisted record count from an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the persisted count does not fit the
    /// physical file.
    pub fn start(&self) -> Result<()> {
        let persisted = self.map.access(0)?.read_u32(self.count_offset as usize);
        let end = self.record_offset(persisted);
        if end > self.map.size() {
            return Err(Error::Corrupted {
                reason: format!(
                    "record count {persisted} needs {end} bytes, file has {}",
                    self.map.size()
                ),
            });
        }
        *self.count.lock() = persisted;
        Ok(())
    }

    /// Persist the record count and payload size.
    pub fn sync(&self) -> Result<()> {
        let count = self.count.lock();
        let memory = self.map.access(0)?;
        memory.write_u64(0, self.record_offset(*count));
        memory.write_u32(self.count_offset as usize, *count);
        Ok(())
    }

    /// Atomically reserve `n` consecutive records, returning the first
    /// index. Grows the file when needed.
    pub fn new_records(&self, n: u32) -> Result<RecordIndex> {
        let mut count = self.count.lock();
        let first = *count;
        let new_count = first
            .checked_add(n)
            .ok_or_else(|| Error::Corrupted { reason: "record index overflow".into() })?;
        self.map.reserve(self.record_offset(new_count))?;
        *count = new_count;
        Ok(first)
    }

    /// The number of allocated records.
    pub fn count(&self) -> RecordIndex {
        *self.count.lock()
    }

    /// Logically truncate to `count` records.
    ///
    /// Only valid from within the writer's critical section; record bytes
    /// past the new count are abandoned, not zeroed.
    pub fn set_count(&self, count: RecordIndex) {
        let mut current = self.count.lock();
        debug_assert!(count <= *current);
        *current = count;
    }

    /// Borrow the mapping at the start of record `index`.
    pub fn get(&self, index: RecordIndex) -> Result<Memory<'_>> {
        self.map.access(self.record_offset(index))
    }

    /// Borrow the mapping `within` bytes into record `index`.
    pub fn get_at(&self, index: RecordIndex, within: u64) -> Result<Memory<'_>> {
        debug_assert!(within < self.record_size);
        self.map.access(self.record_offset(index) + within)
    }

    /// The configured record size in bytes.
    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    /// The underlying mapping (shared with the table header).
    pub fn map(&self) -> &Arc<MemoryMap> {
        &self.map
    }
}
