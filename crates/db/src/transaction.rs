//! Transaction database: the state machine over transaction records.
//!
//! Records live in a slab hash table keyed by transaction hash:
//!
//! ```text
//! [ height|forks|code : u32 ]  ─┐
//! [ position          : u16 ]   ├─ atomic group A (metadata mutex)
//! [ state             : u8  ]  ─┘
//! [ output_count : varint ]
//!   per output:
//!     [ spender_height : u32 ]    atomic group B (writer-serialized)
//!     [ value          : u64 ]    const
//!     [ script         : varbytes ] const
//! [ input_count : varint ]      const
//!   per input: [ prevout:34 | script:varbytes | sequence:u32 ]
//! [ locktime : varint ]         const
//! [ version  : varint ]         const
//! ```
//!
//! The height field is overloaded: a fork set while pooled or indexed, an
//! error code while invalid, a chain height while confirmed. The triple is
//! only ever read or written as one unit under the metadata mutex; each
//! output's spender height is rewritten in place under the coordinator's
//! write serialization and is documented as unguarded for readers.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use chaindb_store::{FileOffset, Memory, MemoryMap, SlabManager, SlabTable, TableHeader};
use chaindb_types::{Hash256, Point, Reader, Transaction, TxOut, Writer};

use crate::cache::{CachedOutput, UnspentOutputs};
use crate::error::{operation_failed, Result};

/// Position sentinel: the transaction is not in a block.
pub const UNCONFIRMED: u16 = u16::MAX;

/// Spender-height sentinel: the output is unspent.
pub const NOT_SPENT: u32 = u32::MAX;

/// Fork sentinel: the pool transaction's validation forks are unknown.
pub const UNVERIFIED: u32 = u32::MAX;

/// Fork-height sentinel: no fork restriction on the query.
pub const UNRESTRICTED: u32 = u32::MAX;

const HEIGHT_OFFSET: usize = 0;
const POSITION_OFFSET: usize = 4;
const STATE_OFFSET: usize = 6;
const METADATA_SIZE: usize = 7;

const SPENDER_HEIGHT_SIZE: usize = 4;
const VALUE_SIZE: usize = 8;

/// Transaction lifecycle states, mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// Interface only; never persisted.
    Missing = 0,
    /// Retained for the reject cache; the height field holds an error code.
    Invalid = 1,
    /// Memory-pool candidate; the height field holds the validation forks.
    Pooled = 2,
    /// Header-chain indexed, not block-confirmed.
    Indexed = 3,
    /// Present in a block at (height, position).
    Confirmed = 4,
}

impl TransactionState {
    fn from_raw(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Missing),
            1 => Ok(Self::Invalid),
            2 => Ok(Self::Pooled),
            3 => Ok(Self::Indexed),
            4 => Ok(Self::Confirmed),
            other => Err(operation_failed(format!("invalid transaction state {other}"))),
        }
    }
}

/// An output read back from a record, with its mutable spender height.
#[derive(Debug, Clone)]
pub struct OutputEntry {
    /// Height of the confirmed spender, or [`NOT_SPENT`].
    pub spender_height: u32,
    /// The output itself.
    pub output: TxOut,
}

/// Prevout metadata populated by [`TransactionDatabase::get_output`].
#[derive(Debug, Clone)]
pub struct Prevout {
    /// The referenced output.
    pub output: TxOut,
    /// Height (or fork set) of the carrying transaction.
    pub height: u32,
    /// Set when the carrying transaction is a coinbase (position zero).
    pub coinbase_height: Option<u32>,
    /// Whether the output is confirmed at the queried fork height.
    pub confirmed: bool,
    /// Whether a confirmed spend at or below the fork height exists.
    pub spent: bool,
}

/// Deferred-read handle over one transaction record.
///
/// Carries a snapshot of the atomic triple taken under the metadata mutex
/// at construction; the record body is parsed on demand. Holding the result
/// pins the mapping against remap — drop it before performing writes that
/// may grow the file.
pub struct TransactionResult<'a> {
    memory: Memory<'a>,
    offset: FileOffset,
    hash: Hash256,
    height: u32,
    position: u16,
    state: TransactionState,
}

impl TransactionResult<'_> {
    /// The slab offset of this record's payload.
    pub fn offset(&self) -> FileOffset {
        self.offset
    }

    /// The transaction hash (the record key).
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// Height, forks or error code, depending on state.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Block position, or [`UNCONFIRMED`].
    pub fn position(&self) -> u16 {
        self.position
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The stored error code, when the transaction is invalid.
    pub fn error(&self) -> Option<u32> {
        (self.state == TransactionState::Invalid).then_some(self.height)
    }

    /// Whether every output has a confirmed spend at or below
    /// `fork_height`.
    ///
    /// Spender heights are unguarded and may be inconsistent during a
    /// write; callers requiring precision must query under the write
    /// serialization.
    pub fn is_spent(&self, fork_height: u32) -> Result<bool> {
        let allow_indexed = fork_height != UNRESTRICTED;
        let confirmed = (self.state == TransactionState::Indexed && allow_indexed)
            || (self.state == TransactionState::Confirmed && self.height <= fork_height);

        // Cannot be spent unless confirmed.
        if !confirmed {
            return Ok(false);
        }

        let mut reader = Reader::new(self.memory.tail(METADATA_SIZE));
        let outputs = reader.get_varint()?;
        for _ in 0..outputs {
            let spender_height = reader.get_u32()?;
            reader.skip(VALUE_SIZE)?;
            reader.skip_varbytes()?;
            if spender_height == NOT_SPENT || spender_height > fork_height {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Skip-scan to output `index`. Returns `None` when out of range.
    pub fn output(&self, index: u32) -> Result<Option<OutputEntry>> {
        let mut reader = Reader::new(self.memory.tail(METADATA_SIZE));
        let outputs = reader.get_varint()?;
        if u64::from(index) >= outputs {
            return Ok(None);
        }

        for _ in 0..index {
            reader.skip(SPENDER_HEIGHT_SIZE + VALUE_SIZE)?;
            reader.skip_varbytes()?;
        }

        let spender_height = reader.get_u32()?;
        let value = reader.get_u64()?;
        let script = reader.get_varbytes()?.into();
        Ok(Some(OutputEntry { spender_height, output: TxOut { value, script } }))
    }

    /// Materialize the full transaction.
    pub fn transaction(&self) -> Result<Transaction> {
        let mut reader = Reader::new(self.memory.tail(METADATA_SIZE));

        let output_count = reader.get_varint()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            reader.skip(SPENDER_HEIGHT_SIZE)?;
            let value = reader.get_u64()?;
            let script = reader.get_varbytes()?.into();
            outputs.push(TxOut { value, script });
        }

        let input_count = reader.get_varint()? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let previous_output = Point::decode(&mut reader)?;
            let script = reader.get_varbytes()?.into();
            let sequence = reader.get_u32()?;
            inputs.push(chaindb_types::TxIn { previous_output, script, sequence });
        }

        let locktime = reader.get_varint()? as u32;
        let version = reader.get_varint()? as u32;
        Ok(Transaction { version, locktime, inputs, outputs })
    }
}

/// The transaction database.
pub struct TransactionDatabase {
    table: SlabTable<32>,
    cache: UnspentOutputs,
    /// Guards the (height, position, state) triple of every record.
    metadata_mutex: RwLock<()>,
}

impl TransactionDatabase {
    /// Open (creating files as needed) the table at `path`.
    pub fn new(
        path: impl AsRef<Path>,
        buckets: u64,
        growth_rate: f64,
        cache_capacity: usize,
    ) -> Result<Self> {
        let map = Arc::new(MemoryMap::open(path, growth_rate)?);
        let header = TableHeader::slab(Arc::clone(&map), buckets);
        let manager = SlabManager::new(map, header.size());
        Ok(Self {
            table: SlabTable::new(header, manager),
            cache: UnspentOutputs::new(cache_capacity),
            metadata_mutex: RwLock::new(()),
        })
    }

    /// Initialize a fresh database.
    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        Ok(())
    }

    /// Validate and load an existing database.
    pub fn open(&self) -> Result<()> {
        self.table.start()?;
        Ok(())
    }

    /// Persist the allocation mark.
    pub fn commit(&self) -> Result<()> {
        self.table.sync()?;
        Ok(())
    }

    /// Flush the mapping to disk.
    pub fn flush(&self) -> Result<()> {
        self.table.manager().map().flush()?;
        Ok(())
    }

    /// Flush prior to shutdown.
    pub fn close(&self) -> Result<()> {
        self.table.manager().map().close()?;
        Ok(())
    }

    /// The slab offset of the most recent record for `hash`.
    pub fn find(&self, hash: &Hash256) -> Result<Option<FileOffset>> {
        Ok(self.table.find(hash)?)
    }

    /// Fetch by hash.
    pub fn get(&self, hash: &Hash256) -> Result<Option<TransactionResult<'_>>> {
        match self.table.find(hash)? {
            Some(offset) => Ok(Some(self.result_at(offset, *hash)?)),
            None => Ok(None),
        }
    }

    /// Fetch by a previously returned slab offset.
    pub fn get_at(&self, offset: FileOffset) -> Result<TransactionResult<'_>> {
        let hash = self.table.read_key(offset)?;
        self.result_at(offset, hash)
    }

    fn result_at(&self, offset: FileOffset, hash: Hash256) -> Result<TransactionResult<'_>> {
        let memory = self.table.get(offset)?;

        // The triple must be read as one unit.
        let (height, position, state) = {
            let _shared = self.metadata_mutex.read();
            (
                memory.read_u32(HEIGHT_OFFSET),
                memory.read_u16(POSITION_OFFSET),
                memory.read_u8(STATE_OFFSET),
            )
        };

        Ok(TransactionResult {
            memory,
            offset,
            hash,
            height,
            position,
            state: TransactionState::from_raw(state)?,
        })
    }

    /// Populate prevout metadata for script validation.
    ///
    /// Consults the unspent-output cache first; on a miss, reads the record
    /// and applies the confirmation rules for `fork_height`
    /// ([`UNRESTRICTED`] lifts the confirmation requirement and excludes
    /// indexed transactions, matching `is_spent`).
    pub fn get_output(&self, point: &Point, fork_height: u32) -> Result<Option<Prevout>> {
        // A coinbase input has no prevout to populate.
        if point.is_null() {
            return Ok(None);
        }

        if let Some(CachedOutput { output, height, coinbase }) =
            self.cache.populate(point, fork_height)
        {
            return Ok(Some(Prevout {
                output,
                height,
                coinbase_height: coinbase.then_some(height),
                confirmed: true,
                spent: false,
            }));
        }

        let Some(result) = self.get(&point.hash)? else {
            return Ok(None);
        };

        // CONSENSUS: the genesis coinbase output is not spendable; it was
        // never entered into the original utxo set.
        let height = result.height();
        if height == 0 {
            return Ok(None);
        }

        let state = result.state();
        let require_confirmed = fork_height != UNRESTRICTED;
        let confirmed = (state == TransactionState::Indexed && require_confirmed)
            || (state == TransactionState::Confirmed && height <= fork_height);

        if require_confirmed && !confirmed {
            return Ok(None);
        }

        let Some(entry) = result.output(point.index)? else {
            return Ok(None);
        };

        let spent = confirmed
            && entry.spender_height != NOT_SPENT
            && entry.spender_height <= fork_height;
        let coinbase_height = (result.position() == 0).then_some(height);

        Ok(Some(Prevout {
            output: entry.output,
            height,
            coinbase_height,
            confirmed,
            spent,
        }))
    }

    /// Store a transaction.
    ///
    /// Confirming spends every input's prevout first and promotes an
    /// existing record in place when one exists. Pool and indexed stores
    /// write a fresh record with `height` holding the fork set and an
    /// unconfirmed position. Returns the record's slab offset.
    pub fn store(
        &self,
        transaction: &Transaction,
        height: u32,
        position: u16,
        state: TransactionState,
    ) -> Result<FileOffset> {
        let hash = transaction.hash();

        if state == TransactionState::Confirmed {
            for input in &transaction.inputs {
                self.spend(&input.previous_output, height)?;
            }

            // Promote a record that already exists (pool/indexed → block).
            if let Some(offset) = self.find(&hash)? {
                self.cache.add(hash, transaction, height);
                self.confirm(offset, height, position, state)?;
                return Ok(offset);
            }
        }

        let record = encode_record(transaction, height, position, state);
        let offset = self.table.store(&hash, &record)?;

        if state == TransactionState::Confirmed {
            self.cache.add(hash, transaction, height);
        }

        debug!(height, position, ?state, "transaction stored");
        Ok(offset)
    }

    /// Demote a transaction to the pool: unspend its prevouts and rewrite
    /// the triple to (unverified, unconfirmed, pooled).
    pub fn pool(&self, offset: FileOffset) -> Result<()> {
        let transaction = self.get_at(offset)?.transaction()?;

        for input in &transaction.inputs {
            self.spend(&input.previous_output, NOT_SPENT)?;
        }

        self.confirm(offset, UNVERIFIED, UNCONFIRMED, TransactionState::Pooled)
    }

    /// Rewrite the spender height of the referenced output.
    ///
    /// A null point succeeds trivially (coinbase inputs). The target must
    /// be confirmed at or below the spender height. The field write itself
    /// is unprotected; the coordinator serializes all spenders.
    pub fn spend(&self, point: &Point, spender_height: u32) -> Result<()> {
        if point.is_null() {
            return Ok(());
        }

        // Stale either way: a spend consumes the cached output, an unspend
        // invalidates its spent-ness context.
        self.cache.remove(point);

        let Some(offset) = self.find(&point.hash)? else {
            return Err(operation_failed("spend: prevout transaction not found"));
        };

        let memory = self.table.get(offset)?;
        let (height, state) = {
            let _shared = self.metadata_mutex.read();
            (memory.read_u32(HEIGHT_OFFSET), memory.read_u8(STATE_OFFSET))
        };

        // Only confirmed outputs at or below the spender can be spent.
        if TransactionState::from_raw(state)? != TransactionState::Confirmed
            || height > spender_height
        {
            return Err(operation_failed("spend: prevout transaction not confirmed"));
        }

        let mut reader = Reader::new(memory.tail(METADATA_SIZE));
        let outputs = reader.get_varint()?;
        if u64::from(point.index) >= outputs {
            return Err(operation_failed("spend: output index out of range"));
        }

        for _ in 0..point.index {
            reader.skip(SPENDER_HEIGHT_SIZE + VALUE_SIZE)?;
            reader.skip_varbytes()?;
        }

        let field = METADATA_SIZE + reader.position();
        memory.write_u32(field, spender_height);
        Ok(())
    }

    /// Atomically rewrite the (height, position, state) triple at
    /// `offset`.
    pub fn confirm(
        &self,
        offset: FileOffset,
        height: u32,
        position: u16,
        state: TransactionState,
    ) -> Result<()> {
        let memory = self.table.get(offset)?;

        let _exclusive = self.metadata_mutex.write();
        memory.write_u32(HEIGHT_OFFSET, height);
        memory.write_u16(POSITION_OFFSET, position);
        memory.write_u8(STATE_OFFSET, state as u8);
        Ok(())
    }

    /// The unspent-output cache (shared with the coordinator's tests).
    pub fn cache(&self) -> &UnspentOutputs {
        &self.cache
    }
}

/// Encode a full record: triple plus body, outputs initially unspent.
fn encode_record(
    transaction: &Transaction,
    height: u32,
    position: u16,
    state: TransactionState,
) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.put_u32(height);
    writer.put_u16(position);
    writer.put_u8(state as u8);

    writer.put_varint(transaction.outputs.len() as u64);
    for output in &transaction.outputs {
        writer.put_u32(NOT_SPENT);
        writer.put_u64(output.value);
        writer.put_varbytes(output.script.as_bytes());
    }

    writer.put_varint(transaction.inputs.len() as u64);
    for input in &transaction.inputs {
        input.previous_output.encode(&mut writer);
        writer.put_varbytes(input.script.as_bytes());
        writer.put_u32(input.sequence);
    }

    writer.put_varint(u64::from(transaction.locktime));
    writer.put_varint(u64::from(transaction.version));
    writer.into_bytes()
}
