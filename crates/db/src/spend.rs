//! Spends index: output point → spending input point.
//!
//! A record hash table keyed by the 34-byte encoded outpoint with a
//! 34-byte inpoint payload. Optional; maintained only when address
//! indexing is enabled, and unwound row-for-row during reorganization.

use std::path::Path;
use std::sync::Arc;

use chaindb_store::{MemoryMap, RecordManager, RecordTable, TableHeader};
use chaindb_types::{Point, Reader};

use crate::error::Result;

const POINT_SIZE: usize = Point::ENCODED_SIZE;

/// The spends database.
pub struct SpendDatabase {
    table: RecordTable<POINT_SIZE>,
}

impl SpendDatabase {
    /// Open (creating files as needed) the table at `path`.
    pub fn new(path: impl AsRef<Path>, buckets: u64, growth_rate: f64) -> Result<Self> {
        let map = Arc::new(MemoryMap::open(path, growth_rate)?);
        let header = TableHeader::record(Arc::clone(&map), buckets);
        let manager = RecordManager::new(
            map,
            header.size(),
            RecordTable::<POINT_SIZE>::record_size(POINT_SIZE as u64),
        );
        Ok(Self { table: RecordTable::new(header, manager) })
    }

    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        Ok(())
    }

    pub fn open(&self) -> Result<()> {
        self.table.start()?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.table.sync()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.table.manager().map().flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.table.manager().map().close()?;
        Ok(())
    }

    /// Record that `outpoint` is consumed by `inpoint`.
    pub fn store(&self, outpoint: &Point, inpoint: &Point) -> Result<()> {
        self.table.store(&outpoint.to_key(), &inpoint.to_key())?;
        Ok(())
    }

    /// The input point spending `outpoint`, if recorded.
    pub fn get(&self, outpoint: &Point) -> Result<Option<Point>> {
        match self.table.find(&outpoint.to_key())? {
            Some(index) => {
                let memory = self.table.get(index)?;
                let mut reader = Reader::new(memory.bytes(0, POINT_SIZE));
                Ok(Some(Point::decode(&mut reader)?))
            }
            None => Ok(None),
        }
    }

    /// Remove the entry for `outpoint` (reorganization unwind).
    ///
    /// Spends are optional, so an absent entry is not an error.
    pub fn unlink(&self, outpoint: &Point) -> Result<bool> {
        Ok(self.table.unlink(&outpoint.to_key())?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn database(dir: &std::path::Path) -> SpendDatabase {
        let db = SpendDatabase::new(dir.join("spend_table"), 31, 1.5).unwrap();
        db.create().unwrap();
        db
    }

    #[test]
    fn test_store_then_get() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let outpoint = Point::new([1; 32], 2);
        let inpoint = Point::new([3; 32], 0);

        db.store(&outpoint, &inpoint).unwrap();
        assert_eq!(db.get(&outpoint).unwrap(), Some(inpoint));
        assert_eq!(db.get(&Point::new([1; 32], 3)).unwrap(), None);
    }

    #[test]
    fn test_unlink_round_trip() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let outpoint = Point::new([4; 32], 0);

        db.store(&outpoint, &Point::new([5; 32], 1)).unwrap();
        assert!(db.unlink(&outpoint).unwrap());
        assert_eq!(db.get(&outpoint).unwrap(), None);
        assert!(!db.unlink(&outpoint).unwrap());
    }
}
