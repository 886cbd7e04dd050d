//! Record multimap: per-key LIFO lists of fixed-size rows.
//!
//! A primary record table maps each key to the head of a singly linked list
//! of rows held in a separate record file (`[next:4 | value]`). `add_row`
//! prepends and `delete_last_row` is its exact inverse, so replaying the
//! inverse sequence restores the prior state bit for bit — the property the
//! reorganization unwind depends on.

use parking_lot::Mutex;

use crate::error::Result;
use crate::memory_map::Memory;
use crate::record_manager::RecordManager;
use crate::record_table::RecordTable;
use crate::{RecordIndex, RECORD_EMPTY};

/// Bytes preceding the value in every list row.
const ROW_PREFIX_SIZE: usize = 4;

/// A two-level multimap: primary hash table plus per-key row lists.
pub struct RecordMultimap<const K: usize> {
    table: RecordTable<K>,
    rows: RecordManager,
    /// Serializes the two-step add/delete splices across both files.
    link_mutex: Mutex<()>,
}

impl<const K: usize> RecordMultimap<K> {
    /// The primary table's payload: one 4-byte head index.
    pub const TABLE_PAYLOAD_SIZE: u64 = 4;

    /// The row size for a given value size.
    pub const fn row_size(value_size: u64) -> u64 {
        ROW_PREFIX_SIZE as u64 + value_size
    }

    pub fn new(table: RecordTable<K>, rows: RecordManager) -> Self {
        Self { table, rows, link_mutex: Mutex::new(()) }
    }

    /// Initialize both files.
    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        self.rows.create()
    }

    /// Validate both files.
    pub fn start(&self) -> Result<()> {
        self.table.start()?;
        self.rows.start()
    }

    /// Persist both allocation marks.
    pub fn sync(&self) -> Result<()> {
        self.table.sync()?;
        self.rows.sync()
    }

    /// Prepend a row for `key`.
    ///
    /// Either the primary entry is created for a first row, or the new row
    /// adopts the current head as successor and the head is rewritten.
    pub fn add_row(&self, key: &[u8; K], value: &[u8]) -> Result<()> {
        debug_assert_eq!(
            value.len() as u64,
            self.rows.record_size() - ROW_PREFIX_SIZE as u64
        );
        let row = self.rows.new_records(1)?;
        self.rows.get(row)?.write_bytes(ROW_PREFIX_SIZE, value);

        let _guard = self.link_mutex.lock();
        match self.table.find(key)? {
            Some(entry) => {
                let head = self.table.get(entry)?.read_u32(0);
                self.rows.get(row)?.write_u32(0, head);
                self.table.get(entry)?.write_u32(0, row);
            }
            None => {
                self.rows.get(row)?.write_u32(0, RECORD_EMPTY);
                self.table.store(key, &row.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Remove the most recently added row for `key`.
    ///
    /// The exact inverse of [`add_row`]: the head moves to its successor,
    /// and the primary entry is unlinked when the list empties. Returns
    /// false when the key has no rows.
    ///
    /// [`add_row`]: RecordMultimap::add_row
    pub fn delete_last_row(&self, key: &[u8; K]) -> Result<bool> {
        let _guard = self.link_mutex.lock();
        let Some(entry) = self.table.find(key)? else {
            return Ok(false);
        };

        let head = self.table.get(entry)?.read_u32(0);
        let next = self.rows.get(head)?.read_u32(0);

        if next == RECORD_EMPTY {
            self.table.unlink(key)?;
        } else {
            self.table.get(entry)?.write_u32(0, next);
        }
        Ok(true)
    }

    /// The head row index for `key`, if any rows exist.
    pub fn lookup(&self, key: &[u8; K]) -> Result<Option<RecordIndex>> {
        match self.table.find(key)? {
            Some(entry) => Ok(Some(self.table.get(entry)?.read_u32(0))),
            None => Ok(None),
        }
    }

    /// Iterate the row indexes of `key`, newest first.
    pub fn rows_of(&self, key: &[u8; K]) -> Result<RowIter<'_, K>> {
        let head = self.lookup(key)?;
        Ok(RowIter { multimap: self, next: head })
    }

    /// Borrow the value of row `index`.
    pub fn value(&self, index: RecordIndex) -> Result<Memory<'_>> {
        self.rows.get_at(index, ROW_PREFIX_SIZE as u64)
    }

    /// The row-list manager (for sync coordination).
    pub fn rows(&self) -> &RecordManager {
        &self.rows
    }

    /// The primary table (for sync coordination).
    pub fn table(&self) -> &RecordTable<K> {
        &self.table
    }
}

/// Iterator over one key's row indexes, newest first.
pub struct RowIter<'a, const K: usize> {
    multimap: &'a RecordMultimap<K>,
    next: Option<RecordIndex>,
}

impl<const K: usize> Iterator for RowIter<'_, K> {
    type Item = Result<RecordIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        match self.multimap.rows.get(current) {
            Ok(memory) => {
                let successor = memory.read_u32(0);
                self.next = (successor != RECORD_EMPTY).then_some(successor);
                Some(Ok(current))
            }
            Err(error) => {
                self.next = None;
                Some(Err(error))
            }
        }
    }
}
