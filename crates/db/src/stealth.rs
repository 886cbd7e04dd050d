//! Stealth index: append-only rows scanned by prefix filter.
//!
//! The 32-bit prefix cannot key a hash table (clients filter on 0..=32
//! leading bits), so rows live in a bare record file and queries scan
//! linearly. 92-byte row:
//!
//! ```text
//! [ prefix:4 | height:4 | ephemeral_key:32 | address:20 | tx_hash:32 ]
//! ```
//!
//! There is no pop inverse: rows from reorganized-away blocks remain and
//! are filtered by height on the read side.

use std::path::Path;
use std::sync::Arc;

use chaindb_store::{MemoryMap, RecordManager};
use chaindb_types::{Hash256, Reader, ShortHash, Writer};

use crate::error::Result;

const ROW_SIZE: u64 = 4 + 4 + 32 + 20 + 32;

/// One stealth announcement row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthRow {
    /// Filter prefix derived from the ephemeral-key script.
    pub prefix: u32,
    /// Height of the containing block.
    pub height: u32,
    /// The unsigned ephemeral public key.
    pub ephemeral_key: Hash256,
    /// The paired payment address short-hash.
    pub address: ShortHash,
    /// The containing transaction.
    pub transaction_hash: Hash256,
}

impl StealthRow {
    fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(ROW_SIZE as usize);
        writer.put_u32(self.prefix);
        writer.put_u32(self.height);
        writer.put_bytes(&self.ephemeral_key);
        writer.put_bytes(&self.address);
        writer.put_bytes(&self.transaction_hash);
        writer.into_bytes()
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            prefix: reader.get_u32()?,
            height: reader.get_u32()?,
            ephemeral_key: reader.get_hash()?,
            address: reader.get_short_hash()?,
            transaction_hash: reader.get_hash()?,
        })
    }
}

/// A prefix filter: match rows whose leading `bits` of prefix equal ours.
#[derive(Debug, Clone, Copy)]
pub struct PrefixFilter {
    /// Number of significant leading bits, 0..=32. Zero matches all rows.
    pub bits: u8,
    /// The bit pattern to match.
    pub prefix: u32,
}

impl PrefixFilter {
    fn matches(&self, prefix: u32) -> bool {
        debug_assert!(self.bits <= 32);
        if self.bits == 0 {
            return true;
        }
        let shift = 32 - u32::from(self.bits);
        (self.prefix ^ prefix) >> shift == 0
    }
}

/// The stealth database.
pub struct StealthDatabase {
    rows: RecordManager,
}

impl StealthDatabase {
    /// Open (creating files as needed) the row file at `path`.
    pub fn new(path: impl AsRef<Path>, growth_rate: f64) -> Result<Self> {
        let map = Arc::new(MemoryMap::open(path, growth_rate)?);
        Ok(Self { rows: RecordManager::new(map, 0, ROW_SIZE) })
    }

    pub fn create(&self) -> Result<()> {
        self.rows.create()?;
        Ok(())
    }

    pub fn open(&self) -> Result<()> {
        self.rows.start()?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.rows.sync()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.rows.map().flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.rows.map().close()?;
        Ok(())
    }

    /// Append a stealth row.
    pub fn store(&self, row: &StealthRow) -> Result<()> {
        let index = self.rows.new_records(1)?;
        self.rows.get(index)?.write_bytes(0, &row.encode());
        Ok(())
    }

    /// Linear scan for rows matching `filter` at or above `from_height`.
    pub fn get(&self, filter: PrefixFilter, from_height: u32) -> Result<Vec<StealthRow>> {
        let mut matches = Vec::new();
        for index in 0..self.rows.count() {
            let memory = self.rows.get(index)?;
            let row = StealthRow::decode(&mut Reader::new(memory.bytes(0, ROW_SIZE as usize)))?;
            if row.height >= from_height && filter.matches(row.prefix) {
                matches.push(row);
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn database(dir: &std::path::Path) -> StealthDatabase {
        let db = StealthDatabase::new(dir.join("stealth_rows"), 1.5).unwrap();
        db.create().unwrap();
        db
    }

    fn row(prefix: u32, height: u32) -> StealthRow {
        StealthRow {
            prefix,
            height,
            ephemeral_key: [7; 32],
            address: [8; 20],
            transaction_hash: [9; 32],
        }
    }

    #[test]
    fn test_store_and_scan_all() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());

        db.store(&row(0xaabb_ccdd, 5)).unwrap();
        db.store(&row(0x1122_3344, 6)).unwrap();

        let all = db.get(PrefixFilter { bits: 0, prefix: 0 }, 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], row(0xaabb_ccdd, 5));
    }

    #[test]
    fn test_prefix_filter_bits() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());

        db.store(&row(0xa000_0000, 1)).unwrap();
        db.store(&row(0xa800_0000, 1)).unwrap();
        db.store(&row(0x2000_0000, 1)).unwrap();

        // Top 4 bits = 0xa: matches the first two rows.
        let matches = db.get(PrefixFilter { bits: 4, prefix: 0xa000_0000 }, 0).unwrap();
        assert_eq!(matches.len(), 2);

        // Top 5 bits distinguish 0xa0 from 0xa8.
        let matches = db.get(PrefixFilter { bits: 5, prefix: 0xa000_0000 }, 0).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].prefix, 0xa000_0000);
    }

    #[test]
    fn test_height_filter() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());

        db.store(&row(1, 10)).unwrap();
        db.store(&row(1, 20)).unwrap();

        let recent = db.get(PrefixFilter { bits: 0, prefix: 0 }, 15).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].height, 20);
    }
}
