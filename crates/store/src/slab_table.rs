//! Hash table over variable-length slabs.
//!
//! Rows are `[key | next:8 | payload]`, chained per bucket, newest first.
//! `store` prepends: allocation and payload write happen outside the link
//! mutex, the chain splice inside it, so a traversing reader sees a row
//! either not at all or fully initialized.

use parking_lot::Mutex;

use crate::error::Result;
use crate::memory_map::Memory;
use crate::slab_manager::SlabManager;
use crate::table_header::TableHeader;
use crate::{FileOffset, SLAB_EMPTY};

/// A slab hash table keyed by `K`-byte keys.
pub struct SlabTable<const K: usize> {
    header: TableHeader,
    manager: SlabManager,
    /// Serializes chain splices (store/unlink), nothing else.
    link_mutex: Mutex<()>,
}

impl<const K: usize> SlabTable<K> {
    /// Bytes preceding the payload in every row.
    pub const PREFIX_SIZE: usize = K + 8;

    pub fn new(header: TableHeader, manager: SlabManager) -> Self {
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

    /// Persist the allocation mark.
    pub fn sync(&self) -> Result<()> {
        self.manager.sync()
    }

    /// Store `payload` under `key`, returning the payload's file offset.
    ///
    /// Prepends to the bucket chain: a duplicate key shadows older rows
    /// for `find`, which resolves most recent first.
    pub fn store(&self, key: &[u8; K], payload: &[u8]) -> Result<FileOffset> {
        let row = self.manager.new_slab((Self::PREFIX_SIZE + payload.len()) as u64)?;

        // Populate the row before it becomes reachable.
        {
            let memory = self.manager.get(row)?;
            memory.write_bytes(0, key);
            memory.write_bytes(Self::PREFIX_SIZE, payload);
        }

        let bucket = self.header.bucket_of(key);
        let _guard = self.link_mutex.lock();
        let head = self.header.read(bucket)?;
        self.manager.get(row)?.write_u64(K, head);
        self.header.write(bucket, row)?;

        Ok(row + Self::PREFIX_SIZE as u64)
    }

    /// Find the most recently stored row for `key`, returning its payload
    /// offset. Traverses without the link mutex.
    pub fn find(&self, key: &[u8; K]) -> Result<Option<FileOffset>> {
        let bucket = self.header.bucket_of(key);
        let mut row = self.header.read(bucket)?;

        while row != SLAB_EMPTY {
            let memory = self.manager.get(row)?;
            if memory.bytes(0, K) == key {
                return Ok(Some(row + Self::PREFIX_SIZE as u64));
            }
            row = memory.read_u64(K);
        }

        Ok(None)
    }

    /// Borrow the payload at a position previously returned by `store` or
    /// `find`.
    pub fn get(&self, position: FileOffset) -> Result<Memory<'_>> {
        self.manager.get(position)
    }

    /// Read back the key of the row owning `position` (the row prefix sits
    /// immediately before the payload).
    pub fn read_key(&self, position: FileOffset) -> Result<[u8; K]> {
        let memory = self.manager.get(position - Self::PREFIX_SIZE as u64)?;
        let mut key = [0u8; K];
        key.copy_from_slice(memory.bytes(0, K));
        Ok(key)
    }

    /// Rewrite the payload of the first matching row in place.
    ///
    /// The closure receives an accessor anchored at the payload. Returns
    /// false when the key is absent.
    pub fn update(&self, key: &[u8; K], write: impl FnOnce(&Memory<'_>)) -> Result<bool> {
        match self.find(key)? {
            Some(position) => {
                write(&self.get(position)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unlink the first matching row from its bucket chain.
    ///
    /// Not safe concurrently with `store` or `unlink` on this table; the
    /// coordinator only calls it from the writer's critical section.
    pub fn unlink(&self, key: &[u8; K]) -> Result<bool> {
        let bucket = self.header.bucket_of(key);
        let _guard = self.link_mutex.lock();

        let mut previous: Option<FileOffset> = None;
        let mut row = self.header.read(bucket)?;

        while row != SLAB_EMPTY {
            let memory = self.manager.get(row)?;
            let next = memory.read_u64(K);
            if memory.bytes(0, K) == key {
                drop(memory);
                match previous {
                    None => self.header.write(bucket, next)?,
                    Some(prior) => self.manager.get(prior)?.write_u64(K, next),
                }
                return Ok(true);
            }
            previous = Some(row);
            row = next;
        }

        Ok(false)
    }

    /// The slab manager backing this table (offset-addressed access).
    pub fn manager(&self) -> &SlabManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use crate::memory_map::MemoryMap;

    use super::*;

    fn table(dir: &std::path::Path, buckets: u64) -> SlabTable<32> {
        let map = Arc::new(MemoryMap::open(dir.join("table"), 1.5).unwrap());
        let header = TableHeader::slab(Arc::clone(&map), buckets);
        let manager = SlabManager::new(map, header.size());
        let table = SlabTable::new(header, manager);
        table.create().unwrap();
        table
    }

    fn key(tag: u8) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[0] = tag;
        key[31] = tag;
        key
    }

    #[test]
    fn test_store_then_find() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 100);

        let position = table.store(&key(1), b"value-one").unwrap();
        let found = table.find(&key(1)).unwrap().unwrap();
        assert_eq!(found, position);
        assert_eq!(table.get(found).unwrap().bytes(0, 9), b"value-one");
        assert_eq!(table.find(&key(2)).unwrap(), None);
    }

    #[test]
    fn test_read_key_recovers_row_key() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 100);

        let position = table.store(&key(9), b"x").unwrap();
        assert_eq!(table.read_key(position).unwrap(), key(9));
    }

    #[test]
    fn test_duplicates_resolve_most_recent_first() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 100);

        table.store(&key(3), b"older").unwrap();
        let newer = table.store(&key(3), b"newer").unwrap();

        let found = table.find(&key(3)).unwrap().unwrap();
        assert_eq!(found, newer);
        assert_eq!(table.get(found).unwrap().bytes(0, 5), b"newer");
    }

    #[test]
    fn test_unlink_removes_most_recent_then_exposes_older() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 100);

        let older = table.store(&key(4), b"older").unwrap();
        table.store(&key(4), b"newer").unwrap();

        assert!(table.unlink(&key(4)).unwrap());
        assert_eq!(table.find(&key(4)).unwrap(), Some(older));
        assert!(table.unlink(&key(4)).unwrap());
        assert_eq!(table.find(&key(4)).unwrap(), None);
        assert!(!table.unlink(&key(4)).unwrap());
    }

    #[test]
    fn test_unlink_mid_chain_preserves_collisions() {
        let dir = tempdir().unwrap();
        // One bucket: every key collides.
        let table = table(dir.path(), 1);

        let first = table.store(&key(1), b"first").unwrap();
        let second = table.store(&key(2), b"second").unwrap();
        table.store(&key(3), b"third").unwrap();

        // key(3) is the chain head; unlink the middle entry.
        assert!(table.unlink(&key(2)).unwrap());
        assert_eq!(table.find(&key(1)).unwrap(), Some(first));
        assert!(table.find(&key(3)).unwrap().is_some());
        assert_eq!(table.find(&key(2)).unwrap(), None);
        let _ = second;
    }

    #[test]
    fn test_update_rewrites_in_place() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 100);

        let position = table.store(&key(7), b"aaaa").unwrap();
        assert!(table.update(&key(7), |memory| memory.write_bytes(0, b"bbbb")).unwrap());
        assert_eq!(table.get(position).unwrap().bytes(0, 4), b"bbbb");
        assert!(!table.update(&key(8), |_| unreachable!()).unwrap());
    }

    #[test]
    fn test_variable_length_payloads_coexist() {
        let dir = tempdir().unwrap();
        let table = table(dir.path(), 4);

        let positions: Vec<(u8, FileOffset, usize)> = (0..32u8)
            .map(|tag| {
                let payload = vec![tag; 1 + tag as usize * 7];
                let position = table.store(&key(tag), &payload).unwrap();
                (tag, position, payload.len())
            })
            .collect();

        for (tag, position, len) in positions {
            let found = table.find(&key(tag)).unwrap().unwrap();
            assert_eq!(found, position);
            assert!(table.get(found).unwrap().bytes(0, len).iter().all(|&b| b == tag));
        }
    }

    /// Concurrent stores and finds on distinct keys: readers must observe
    /// fully initialized rows only (the link splice is the publish point).
    #[test]
    fn test_concurrent_store_and_find() {
        let dir = tempdir().unwrap();
        let table = Arc::new(table(dir.path(), 16));

        for tag in 0..8u8 {
            table.store(&key(tag), &[tag; 24]).unwrap();
        }

        let writer = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for tag in 8..128u8 {
                    table.store(&key(tag), &[tag; 24]).unwrap();
                }
            })
        };

        let reader = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for round in 0..200 {
                    let tag = (round % 8) as u8;
                    let position = table.find(&key(tag)).unwrap().expect("seeded key");
                    let memory = table.get(position).unwrap();
                    assert!(memory.bytes(0, 24).iter().all(|&b| b == tag), "torn row for {tag}");
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
