//! Chain domain types: points, scripts, transactions, headers, blocks.
//!
//! Each type carries its canonical wire encoding, which doubles as the hash
//! preimage. Database record layouts embed these encodings but interleave
//! mutable metadata; those layouts belong to the databases, not here.

use crate::encoding::{self, Reader, Writer};
use crate::hash::{bitcoin_hash, merkle_root, Hash256, NULL_HASH};
use crate::script;

/// Sentinel index marking a null (coinbase) point. Fits the two-byte
/// on-disk index field.
pub const NULL_POINT_INDEX: u32 = 0xffff;

/// Reward of the built-in genesis coinbase, in base units.
const GENESIS_REWARD: u64 = 50_0000_0000;

/// A reference to a transaction output (or input, for the spends index).
///
/// Encoded as `[hash:32 | index:2]` — 34 bytes. The index is widened to
/// `u32` in memory for arithmetic convenience but must fit 16 bits on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    /// The transaction containing the referenced output.
    pub hash: Hash256,
    /// The output position within that transaction.
    pub index: u32,
}

impl Point {
    /// Encoded size on disk.
    pub const ENCODED_SIZE: usize = 34;

    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    /// The null point: what a coinbase input references.
    pub fn null() -> Self {
        Self { hash: NULL_HASH, index: NULL_POINT_INDEX }
    }

    /// True for the coinbase sentinel.
    pub fn is_null(&self) -> bool {
        self.hash == NULL_HASH && self.index == NULL_POINT_INDEX
    }

    pub fn encode(&self, writer: &mut Writer) {
        writer.put_bytes(&self.hash);
        writer.put_u16(self.index as u16);
    }

    pub fn decode(reader: &mut Reader<'_>) -> encoding::Result<Self> {
        let hash = reader.get_hash()?;
        let index = u32::from(reader.get_u16()?);
        Ok(Self { hash, index })
    }

    /// A 64-bit fold of the point, used by the payment history index to
    /// let clients correlate an input row with the output it spends
    /// without a second lookup.
    pub fn checksum(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.hash[..8]);
        u64::from_le_bytes(word) ^ u64::from(self.index)
    }

    /// Fixed-size array form, used as a hash-table key by the spends index.
    pub fn to_key(self) -> [u8; Self::ENCODED_SIZE] {
        let mut key = [0u8; Self::ENCODED_SIZE];
        key[..32].copy_from_slice(&self.hash);
        key[32..].copy_from_slice(&(self.index as u16).to_le_bytes());
        key
    }
}

/// An opaque script. The store never evaluates scripts; the address and
/// stealth indexes pattern-match them via [`crate::script`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Script {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// The output being spent; null for coinbase.
    pub previous_output: Point,
    /// Unlocking script.
    pub script: Script,
    /// Sequence field.
    pub sequence: u32,
}

impl TxIn {
    pub fn encode(&self, writer: &mut Writer) {
        self.previous_output.encode(writer);
        writer.put_varbytes(self.script.as_bytes());
        writer.put_u32(self.sequence);
    }

    pub fn decode(reader: &mut Reader<'_>) -> encoding::Result<Self> {
        let previous_output = Point::decode(reader)?;
        let script = Script::from(reader.get_varbytes()?);
        let sequence = reader.get_u32()?;
        Ok(Self { previous_output, script, sequence })
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in base units.
    pub value: u64,
    /// Locking script.
    pub script: Script,
}

impl TxOut {
    pub fn encode(&self, writer: &mut Writer) {
        writer.put_u64(self.value);
        writer.put_varbytes(self.script.as_bytes());
    }

    pub fn decode(reader: &mut Reader<'_>) -> encoding::Result<Self> {
        let value = reader.get_u64()?;
        let script = Script::from(reader.get_varbytes()?);
        Ok(Self { value, script })
    }
}

/// A transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub locktime: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// A coinbase has exactly one input and it references the null point.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Canonical wire encoding (the hash preimage).
    pub fn encode(&self, writer: &mut Writer) {
        writer.put_u32(self.version);
        writer.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(writer);
        }
        writer.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(writer);
        }
        writer.put_u32(self.locktime);
    }

    pub fn decode(reader: &mut Reader<'_>) -> encoding::Result<Self> {
        let version = reader.get_u32()?;
        let input_count = reader.get_varint()? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxIn::decode(reader)?);
        }
        let output_count = reader.get_varint()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOut::decode(reader)?);
        }
        let locktime = reader.get_u32()?;
        Ok(Self { version, locktime, inputs, outputs })
    }

    /// The transaction identity hash.
    pub fn hash(&self) -> Hash256 {
        let mut writer = Writer::new();
        self.encode(&mut writer);
        bitcoin_hash(&writer.into_bytes())
    }
}

/// A block header. Fixed 80-byte encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub previous_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    /// Encoded size on disk.
    pub const ENCODED_SIZE: usize = 80;

    pub fn encode(&self, writer: &mut Writer) {
        writer.put_u32(self.version);
        writer.put_bytes(&self.previous_block_hash);
        writer.put_bytes(&self.merkle_root);
        writer.put_u32(self.timestamp);
        writer.put_u32(self.bits);
        writer.put_u32(self.nonce);
    }

    pub fn decode(reader: &mut Reader<'_>) -> encoding::Result<Self> {
        Ok(Self {
            version: reader.get_u32()?,
            previous_block_hash: reader.get_hash()?,
            merkle_root: reader.get_hash()?,
            timestamp: reader.get_u32()?,
            bits: reader.get_u32()?,
            nonce: reader.get_u32()?,
        })
    }

    /// The block identity hash.
    pub fn hash(&self) -> Hash256 {
        let mut writer = Writer::with_capacity(Self::ENCODED_SIZE);
        self.encode(&mut writer);
        bitcoin_hash(&writer.into_bytes())
    }
}

/// A block: header plus ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// The block identity hash (the header hash).
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Merkle root over the contained transaction hashes.
    pub fn generate_merkle_root(&self) -> Hash256 {
        let hashes: Vec<Hash256> = self.transactions.iter().map(Transaction::hash).collect();
        merkle_root(&hashes)
    }

    /// The deterministic genesis block of the chain.
    ///
    /// One coinbase paying [`GENESIS_REWARD`] to a fixed payment script. Its
    /// output is unspendable by consensus (the store enforces this in
    /// prevout population, not here).
    pub fn genesis() -> Self {
        let coinbase = Transaction {
            version: 1,
            locktime: 0,
            inputs: vec![TxIn {
                previous_output: Point::null(),
                script: Script::from(&b"chaindb genesis / nihil sine labore"[..]),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: GENESIS_REWARD,
                script: script::pay_to_short_hash([0x5c; 20]),
            }],
        };

        let header = Header {
            version: 1,
            previous_block_hash: NULL_HASH,
            merkle_root: merkle_root(&[coinbase.hash()]),
            timestamp: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 0x7c2b_ac1d,
        };

        Self { header, transactions: vec![coinbase] }
    }
}
