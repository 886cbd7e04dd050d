//! Payment history index: address short-hash → LIFO payment rows.
//!
//! Backed by the record multimap so that reorganization can unwind appends
//! exactly. Each 47-byte row records one output received by, or one input
//! spending from, an address:
//!
//! ```text
//! [ height:4 | kind:1 | point:34 | data:8 ]
//! ```
//!
//! `data` is the output value for receipt rows and the prevout checksum
//! for spend rows.

use std::path::Path;
use std::sync::Arc;

use chaindb_store::{MemoryMap, RecordManager, RecordMultimap, RecordTable, TableHeader};
use chaindb_types::{Point, Reader, ShortHash, Writer};

use crate::error::Result;

const KEY_SIZE: usize = 20;
const ROW_VALUE_SIZE: u64 = 4 + 1 + Point::ENCODED_SIZE as u64 + 8;

/// Whether a payment row records a receipt or a spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointKind {
    /// The point is an output paying the address; `data` is its value.
    Output = 0,
    /// The point is an input spending from the address; `data` is the
    /// prevout checksum.
    Input = 1,
}

/// One row of an address's payment history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRow {
    pub height: u32,
    pub kind: PointKind,
    pub point: Point,
    pub data: u64,
}

impl PaymentRow {
    fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(ROW_VALUE_SIZE as usize);
        writer.put_u32(self.height);
        writer.put_u8(self.kind as u8);
        self.point.encode(&mut writer);
        writer.put_u64(self.data);
        writer.into_bytes()
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let height = reader.get_u32()?;
        let kind = match reader.get_u8()? {
            0 => PointKind::Output,
            _ => PointKind::Input,
        };
        let point = Point::decode(reader)?;
        let data = reader.get_u64()?;
        Ok(Self { height, kind, point, data })
    }
}

/// The payment history database.
pub struct HistoryDatabase {
    multimap: RecordMultimap<KEY_SIZE>,
}

impl HistoryDatabase {
    /// Open (creating files as needed) the primary table and row file.
    pub fn new(
        table_path: impl AsRef<Path>,
        rows_path: impl AsRef<Path>,
        buckets: u64,
        growth_rate: f64,
    ) -> Result<Self> {
        let map = Arc::new(MemoryMap::open(table_path, growth_rate)?);
        let header = TableHeader::record(Arc::clone(&map), buckets);
        let manager = RecordManager::new(
            map,
            header.size(),
            RecordTable::<KEY_SIZE>::record_size(RecordMultimap::<KEY_SIZE>::TABLE_PAYLOAD_SIZE),
        );
        let table = RecordTable::new(header, manager);

        let rows = RecordManager::new(
            Arc::new(MemoryMap::open(rows_path, growth_rate)?),
            0,
            RecordMultimap::<KEY_SIZE>::row_size(ROW_VALUE_SIZE),
        );

        Ok(Self { multimap: RecordMultimap::new(table, rows) })
    }

    pub fn create(&self) -> Result<()> {
        self.multimap.create()?;
        Ok(())
    }

    pub fn open(&self) -> Result<()> {
        self.multimap.start()?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.multimap.sync()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.multimap.table().manager().map().flush()?;
        self.multimap.rows().map().flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.multimap.table().manager().map().close()?;
        self.multimap.rows().map().close()?;
        Ok(())
    }

    /// Append a payment row for `key`.
    pub fn store(&self, key: &ShortHash, row: &PaymentRow) -> Result<()> {
        self.multimap.add_row(key, &row.encode())?;
        Ok(())
    }

    /// Fetch rows for `key`, newest first.
    ///
    /// `limit` of zero means unlimited; rows below `from_height` are
    /// skipped (their storage cost is still paid — the list is not
    /// height-ordered beyond chain order).
    pub fn get(&self, key: &ShortHash, limit: usize, from_height: u32) -> Result<Vec<PaymentRow>> {
        let mut rows = Vec::new();
        for index in self.multimap.rows_of(key)? {
            if limit > 0 && rows.len() >= limit {
                break;
            }
            let memory = self.multimap.value(index?)?;
            let row = PaymentRow::decode(&mut Reader::new(memory.bytes(0, ROW_VALUE_SIZE as usize)))?;
            if row.height >= from_height {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Remove the most recently appended row for `key` (reorganization
    /// unwind; the exact inverse of [`store`]).
    ///
    /// [`store`]: HistoryDatabase::store
    pub fn unlink_last_row(&self, key: &ShortHash) -> Result<bool> {
        Ok(self.multimap.delete_last_row(key)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn database(dir: &std::path::Path) -> HistoryDatabase {
        let db =
            HistoryDatabase::new(dir.join("history_table"), dir.join("history_rows"), 13, 1.5)
                .unwrap();
        db.create().unwrap();
        db
    }

    fn receipt(height: u32, value: u64) -> PaymentRow {
        PaymentRow {
            height,
            kind: PointKind::Output,
            point: Point::new([height as u8; 32], 0),
            data: value,
        }
    }

    #[test]
    fn test_rows_return_newest_first() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let key = [1u8; 20];

        db.store(&key, &receipt(10, 100)).unwrap();
        db.store(&key, &receipt(11, 200)).unwrap();

        let rows = db.get(&key, 0, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], receipt(11, 200));
        assert_eq!(rows[1], receipt(10, 100));
    }

    #[test]
    fn test_limit_and_height_filter() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let key = [2u8; 20];

        for height in 1..=5 {
            db.store(&key, &receipt(height, 100)).unwrap();
        }

        assert_eq!(db.get(&key, 2, 0).unwrap().len(), 2);
        let recent = db.get(&key, 0, 4).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|row| row.height >= 4));
    }

    #[test]
    fn test_unlink_last_row_is_inverse() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let key = [3u8; 20];

        db.store(&key, &receipt(1, 100)).unwrap();
        db.store(&key, &receipt(2, 200)).unwrap();

        assert!(db.unlink_last_row(&key).unwrap());
        assert_eq!(db.get(&key, 0, 0).unwrap(), vec![receipt(1, 100)]);
        assert!(db.unlink_last_row(&key).unwrap());
        assert!(db.get(&key, 0, 0).unwrap().is_empty());
        assert!(!db.unlink_last_row(&key).unwrap());
    }

    #[test]
    fn test_spend_rows_carry_checksum() {
        let dir = tempdir().unwrap();
        let db = database(dir.path());
        let key = [4u8; 20];
        let prevout = Point::new([9; 32], 3);

        let row = PaymentRow {
            height: 8,
            kind: PointKind::Input,
            point: Point::new([5; 32], 0),
            data: prevout.checksum(),
        };
        db.store(&key, &row).unwrap();

        let rows = db.get(&key, 0, 0).unwrap();
        assert_eq!(rows[0].kind, PointKind::Input);
        assert_eq!(rows[0].data, prevout.checksum());
    }
}
