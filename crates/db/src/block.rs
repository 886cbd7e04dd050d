//! Block database: header/block records plus positional chain indexes.
//!
//! One record hash table keyed by header hash carries a fixed 95-byte body:
//!
//! ```text
//! [ header:80 | height:4 | checksum:4 | tx_start:4 | tx_count:2 | state:1 ]
//! ```
//!
//! `header` and `height` are immutable once the record is reachable; the
//! tail group (checksum, tx_start, tx_count, state) changes when a header
//! is promoted to a block and is guarded by the metadata mutex.
//!
//! Three plain record files complete the picture: `header_index` and
//! `block_index` map heights to record indexes for the header chain and the
//! block chain respectively, and `transaction_index` stores each block's
//! transaction slab offsets contiguously (`tx_start`/`tx_count` address
//! into it).

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use chaindb_store::{
    FileOffset, Memory, MemoryMap, RecordIndex, RecordManager, RecordTable, TableHeader,
    RECORD_EMPTY,
};
use chaindb_types::{Hash256, Header, Reader, Writer};

use crate::error::{operation_failed, Error, Result};

/// Which positional chain index to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainIndex {
    /// The header chain (headers-first sync).
    Header,
    /// The block chain (fully associated blocks).
    Block,
}

/// Block state flags. `INDEXED` and `CONFIRMED` record membership in the
/// header and block chains; `VALID` is set on every stored entry (blocks
/// reach the store only after validation).
pub mod block_state {
    pub const VALID: u8 = 1 << 2;
    pub const INDEXED: u8 = 1 << 4;
    pub const CONFIRMED: u8 = 1 << 5;

    pub fn is_indexed(state: u8) -> bool {
        state & INDEXED != 0
    }

    pub fn is_confirmed(state: u8) -> bool {
        state & CONFIRMED != 0
    }
}

const HEADER_OFFSET: usize = 0;
const HEIGHT_OFFSET: usize = Header::ENCODED_SIZE;
const CHECKSUM_OFFSET: usize = HEIGHT_OFFSET + 4;
const TX_START_OFFSET: usize = CHECKSUM_OFFSET + 4;
const TX_COUNT_OFFSET: usize = TX_START_OFFSET + 4;
const STATE_OFFSET: usize = TX_COUNT_OFFSET + 2;
const BODY_SIZE: u64 = (STATE_OFFSET + 1) as u64;

/// Checksum is unpopulated in this record version.
const NO_CHECKSUM: u32 = 0;

const INDEX_RECORD_SIZE: u64 = 4;
const TX_INDEX_RECORD_SIZE: u64 = 8;

/// Deferred-read handle over one block record.
pub struct BlockResult<'a> {
    memory: Memory<'a>,
    tx_index: &'a RecordManager,
    hash: Hash256,
    height: u32,
    checksum: u32,
    tx_start: RecordIndex,
    tx_count: u16,
    state: u8,
}

impl BlockResult<'_> {
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// The height stored in the record (valid in any branch).
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        block_state::is_confirmed(self.state)
    }

    pub fn is_indexed(&self) -> bool {
        block_state::is_indexed(self.state)
    }

    /// The optional content checksum (zero when uncached).
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The number of associated transactions (zero for bare headers).
    pub fn transaction_count(&self) -> u16 {
        self.tx_count
    }

    /// Decode the stored header.
    pub fn header(&self) -> Result<Header> {
        let mut reader = Reader::new(self.memory.bytes(HEADER_OFFSET, Header::ENCODED_SIZE));
        Ok(Header::decode(&mut reader)?)
    }

    /// Read back the block's transaction slab offsets, in block order.
    pub fn transaction_offsets(&self) -> Result<Vec<FileOffset>> {
        let mut offsets = Vec::with_capacity(usize::from(self.tx_count));
        for position in 0..u32::from(self.tx_count) {
            let record = self.tx_index.get(self.tx_start + position)?;
            offsets.push(record.read_u64(0));
        }
        Ok(offsets)
    }
}

/// The block database.
pub struct BlockDatabase {
    table: RecordTable<32>,
    header_index: RecordManager,
    block_index: RecordManager,
    tx_index: RecordManager,
    /// Guards the mutable tail group of every record.
    metadata_mutex: RwLock<()>,
}

impl BlockDatabase {
    /// Open (creating files as needed) the four block database files.
    pub fn new(
        table_path: impl AsRef<Path>,
        header_index_path: impl AsRef<Path>,
        block_index_path: impl AsRef<Path>,
        tx_index_path: impl AsRef<Path>,
        buckets: u64,
        growth_rate: f64,
    ) -> Result<Self> {
        let map = Arc::new(MemoryMap::open(table_path, growth_rate)?);
        let header = TableHeader::record(Arc::clone(&map), buckets);
        let manager =
            RecordManager::new(map, header.size(), RecordTable::<32>::record_size(BODY_SIZE));

        let header_index = RecordManager::new(
            Arc::new(MemoryMap::open(header_index_path, growth_rate)?),
            0,
            INDEX_RECORD_SIZE,
        );
        let block_index = RecordManager::new(
            Arc::new(MemoryMap::open(block_index_path, growth_rate)?),
            0,
            INDEX_RECORD_SIZE,
        );
        let tx_index = RecordManager::new(
            Arc::new(MemoryMap::open(tx_index_path, growth_rate)?),
            0,
            TX_INDEX_RECORD_SIZE,
        );

        Ok(Self {
            table: RecordTable::new(header, manager),
            header_index,
            block_index,
            tx_index,
            metadata_mutex: RwLock::new(()),
        })
    }

    /// Initialize fresh files.
    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        self.header_index.create()?;
        self.block_index.create()?;
        self.tx_index.create()?;
        Ok(())
    }

    /// Validate and load existing files.
    pub fn open(&self) -> Result<()> {
        self.table.start()?;
        self.header_index.start()?;
        self.block_index.start()?;
        self.tx_index.start()?;
        Ok(())
    }

    /// Persist all allocation marks.
    pub fn commit(&self) -> Result<()> {
        self.table.sync()?;
        self.header_index.sync()?;
        self.block_index.sync()?;
        self.tx_index.sync()?;
        Ok(())
    }

    /// Flush all mappings to disk.
    pub fn flush(&self) -> Result<()> {
        self.table.manager().map().flush()?;
        self.header_index.map().flush()?;
        self.block_index.map().flush()?;
        self.tx_index.map().flush()?;
        Ok(())
    }

    /// Flush prior to shutdown.
    pub fn close(&self) -> Result<()> {
        self.table.manager().map().close()?;
        self.header_index.map().close()?;
        self.block_index.map().close()?;
        self.tx_index.map().close()?;
        Ok(())
    }

    fn index(&self, chain: ChainIndex) -> &RecordManager {
        match chain {
            ChainIndex::Header => &self.header_index,
            ChainIndex::Block => &self.block_index,
        }
    }

    /// The height of the chain top, or `None` for an empty chain.
    pub fn top(&self, chain: ChainIndex) -> Option<u32> {
        let count = self.index(chain).count();
        (count > 0).then(|| count - 1)
    }

    /// Append a header to the header chain.
    ///
    /// Stores a new record in the indexed state and writes the header
    /// index entry. Height continuity is the coordinator's preflight.
    pub fn store_header(&self, header: &Header, height: u32) -> Result<()> {
        let record = self.store_record(header, height, block_state::VALID | block_state::INDEXED)?;
        self.push_index(ChainIndex::Header, height, record)
    }

    /// Promote a block into the block chain.
    ///
    /// `offsets` are the block's transaction slab offsets in block order,
    /// produced by the transaction pushes. An existing record for the hash
    /// (stored by a prior header push) is updated in place; otherwise a
    /// fresh confirmed record is created.
    pub fn store_block(
        &self,
        header: &Header,
        height: u32,
        offsets: &[FileOffset],
    ) -> Result<()> {
        let tx_start = self.associate(offsets)?;
        let tx_count = u16::try_from(offsets.len())
            .map_err(|_| operation_failed("block transaction count exceeds u16"))?;
        let hash = header.hash();

        let record = match self.table.find(&hash)? {
            Some(record) => {
                let memory = self.table.get(record)?;
                let _exclusive = self.metadata_mutex.write();
                memory.write_u32(CHECKSUM_OFFSET, NO_CHECKSUM);
                memory.write_u32(TX_START_OFFSET, tx_start);
                memory.write_u16(TX_COUNT_OFFSET, tx_count);
                memory.write_u8(
                    STATE_OFFSET,
                    memory.read_u8(STATE_OFFSET) | block_state::CONFIRMED,
                );
                record
            }
            None => {
                let state = block_state::VALID | block_state::CONFIRMED;
                let body = encode_body(header, height, tx_start, tx_count, state);
                self.table.store(&hash, &body)?
            }
        };

        self.push_index(ChainIndex::Block, height, record)
    }

    fn store_record(&self, header: &Header, height: u32, state: u8) -> Result<RecordIndex> {
        let body = encode_body(header, height, 0, 0, state);
        Ok(self.table.store(&header.hash(), &body)?)
    }

    /// Save transaction offsets contiguously, returning the first index.
    fn associate(&self, offsets: &[FileOffset]) -> Result<RecordIndex> {
        if offsets.is_empty() {
            return Ok(0);
        }
        let start = self.tx_index.new_records(offsets.len() as u32)?;
        for (position, offset) in offsets.iter().enumerate() {
            self.tx_index.get(start + position as u32)?.write_u64(0, *offset);
        }
        Ok(start)
    }

    /// Append a chain-index entry; the chain is dense, so the entry height
    /// must equal the current count.
    fn push_index(&self, chain: ChainIndex, height: u32, record: RecordIndex) -> Result<()> {
        let index = self.index(chain);
        if index.count() != height {
            return Err(operation_failed(format!(
                "chain index append at height {height} with {} entries",
                index.count()
            )));
        }
        let entry = index.new_records(1)?;
        index.get(entry)?.write_u32(0, record);
        Ok(())
    }

    /// Fetch the block at `height` on the given chain.
    pub fn get(&self, height: u32, chain: ChainIndex) -> Result<Option<BlockResult<'_>>> {
        let index = self.index(chain);
        if height >= index.count() {
            return Ok(None);
        }

        let record = index.get(height)?.read_u32(0);
        if record == RECORD_EMPTY {
            return Err(Error::Store {
                source: chaindb_store::Error::Corrupted {
                    reason: format!("empty chain index entry at height {height}"),
                },
            });
        }

        let hash = self.table.read_key(record)?;
        Ok(Some(self.result_at(record, hash)?))
    }

    /// Fetch by header hash (most recent record for the hash).
    pub fn get_by_hash(&self, hash: &Hash256) -> Result<Option<BlockResult<'_>>> {
        match self.table.find(hash)? {
            Some(record) => Ok(Some(self.result_at(record, *hash)?)),
            None => Ok(None),
        }
    }

    fn result_at(&self, record: RecordIndex, hash: Hash256) -> Result<BlockResult<'_>> {
        let memory = self.table.get(record)?;
        let height = memory.read_u32(HEIGHT_OFFSET);

        // The mutable tail group must be read as one unit.
        let (checksum, tx_start, tx_count, state) = {
            let _shared = self.metadata_mutex.read();
            (
                memory.read_u32(CHECKSUM_OFFSET),
                memory.read_u32(TX_START_OFFSET),
                memory.read_u16(TX_COUNT_OFFSET),
                memory.read_u8(STATE_OFFSET),
            )
        };

        Ok(BlockResult {
            memory,
            tx_index: &self.tx_index,
            hash,
            height,
            checksum,
            tx_start,
            tx_count,
            state,
        })
    }

    /// Remove the chain top at `height`: clear the membership flag and
    /// truncate the index. The record itself (and its transaction index
    /// range) remains on disk.
    pub fn unconfirm(&self, height: u32, chain: ChainIndex) -> Result<()> {
        let index = self.index(chain);
        if index.count() != height + 1 {
            return Err(operation_failed(format!(
                "unconfirm at height {height} with {} entries",
                index.count()
            )));
        }

        let record = index.get(height)?.read_u32(0);
        let memory = self.table.get(record)?;
        let flag = match chain {
            ChainIndex::Header => block_state::INDEXED,
            ChainIndex::Block => block_state::CONFIRMED,
        };

        {
            let _exclusive = self.metadata_mutex.write();
            memory.write_u8(STATE_OFFSET, memory.read_u8(STATE_OFFSET) & !flag);
        }

        index.set_count(height);
        Ok(())
    }
}

fn encode_body(
    header: &Header,
    height: u32,
    tx_start: RecordIndex,
    tx_count: u16,
    state: u8,
) -> Vec<u8> {
    let mut writer = Writer::with_capacity(BODY_SIZE as usize);
    header.encode(&mut writer);
    writer.put_u32(height);
    writer.put_u32(NO_CHECKSUM);
    writer.put_u32(tx_start);
    writer.put_u16(tx_count);
    writer.put_u8(state);
    debug_assert_eq!(writer.len() as u64, BODY_SIZE);
    writer.into_bytes()
}
