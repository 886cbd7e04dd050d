//! Hash table over fixed-size records.
//!
//! Same chain semantics as [`crate::slab_table`], but rows live in a record
//! file and positions are 32-bit record indexes: `[key | next:4 | payload]`
//! with `record_size = K + 4 + payload_size`.

use parking_lot::Mutex;

use crate::error::Result;
use crate::memory_map::Memory;
use crate::record_manager::RecordManager;
use crate::table_header::TableHeader;
use crate::{RecordIndex, RECORD_EMPTY};

/// A record hash table keyed by `K`-byte keys.
pub struct RecordTable<const K: usize> {
    header: TableHeader,
    manager: RecordManager,
    /// Serializes chain splices (store/unlink), nothing else.
    link_mutex: Mutex<()>,
}

impl<const K: usize> RecordTable<K> {
    /// Bytes preceding the payload in every row.
    pub const PREFIX_SIZE: usize = K + 4;

    /// The full row size for a given payload size.
    pub const fn record_size(payload_size: u64) -> u64 {
        Self::PREFIX_SIZE as u64 + payload_size
    }

    pub fn new(header: TableHeader, manager: RecordManager) -> Self {
        debug_assert!(manager.record_size() > Self::PREFIX_SIZE as u64);
        Self { header, manager, link_mutex: Mutex::new(()) }
    }

    /// Initialize header and manager on a fresh file.
    pub fn create(&self) -> Result<()> {
        self.header.create()?;
        self.manager.create()
    }

    /// Validate header and manager against an existing file.
    pub fn start(&self) -> Result<()> {
        self.header.start()?;
        self.manager.start()
    }

    /// Persist the record count.
    pub fn sync(&self) -> Result<()> {
        self.manager.sync()
    }

    /// Payload size implied by the manager's record size.
    fn payload_size(&self) -> usize {
        self.manager.record_size() as usize - Self::PREFIX_SIZE
    }

    /// Store `payload` under `key`, returning the new record's index.
    pub fn store(&self, key: &[u8; K], payload: &[u8]) -> Result<RecordIndex> {
        debug_assert_eq!(payload.len(), self.payload_size());
        let row = self.manager.new_records(1)?;

        // Populate the row before it becomes reachable.
        {
            let memory = self.manager.get(row)?;
            memory.write_bytes(0, key);
            memory.write_bytes(Self::PREFIX_SIZE, payload);
        }

        let bucket = self.header.bucket_of(key);
        let _guard = self.link_mutex.lock();
        let head = self.header.read(bucket)? as RecordIndex;
        self.manager.get(row)?.write_u32(K, head);
        self.header.write(bucket, u64::from(row))?;

        Ok(row)
    }

    /// Find the most recently stored row for `key`.
    pub fn find(&self, key: &[u8; K]) -> Result<Option<RecordIndex>> {
        let bucket = self.header.bucket_of(key);
        let mut row = self.header.read(bucket)? as RecordIndex;

        while row != RECORD_EMPTY {
            let memory = self.manager.get(row)?;
            if memory.bytes(0, K) == key {
                return Ok(Some(row));
            }
            row = memory.read_u32(K);
        }

        Ok(None)
    }

    /// Borrow the payload of record `index`.
    pub fn get(&self, index: RecordIndex) -> Result<Memory<'_>> {
        self.manager.get_at(index, Self::PREFIX_SIZE as u64)
    }

    /// Read back the key of record `index`.
    pub fn read_key(&self, index: RecordIndex) -> Result<[u8; K]> {
        let memory = self.manager.get(index)?;
        let mut key = [0u8; K];
        key.copy_from_slice(memory.bytes(0, K));
        Ok(key)
    }

    /// Rewrite the payload of the first matching row in place.
    pub fn update(&self, key: &[u8; K], write: impl FnOnce(&Memory<'_>)) -> Result<bool> {
        match self.find(key)? {
            Some(index) => {
                write(&self.get(index)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unlink the first matching row from its bucket chain.
    ///
    /// Not safe concurrently with `store` or `unlink` on this table.
    pub fn unlink(&self, key: &[u8; K]) -> Result<bool> {
        let bucket = self.header.bucket_of(key);
        let _guard = self.link_mutex.lock();

        let mut previous: Option<RecordIndex> = None;
        let mut row = self.header.read(bucket)? as RecordIndex;

        while row != RECORD_EMPTY {
            let memory = self.manager.get(row)?;
            let next = memory.read_u32(K);
            if memory.bytes(0, K) == key {
                drop(memory);
                match previous {
                    None => self.header.write(bucket, u64::from(next))?,
                    Some(prior) => self.manager.get(prior)?.write_u32(K, next),
                }
                return Ok(true);
            }
            previous = Some(row);
            row = next;
        }

        Ok(false)
    }

    /// The record manager backing this table.
    pub fn manager(&self) -> &RecordManager {
        &self.manager
    }
}
