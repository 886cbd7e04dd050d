//! Hash-table bucket array.
//!
//! A fixed array of bucket heads sized at create time, stored immediately
//! after the payload-size cell. Entries are 8 bytes (slab offsets, empty
//! sentinel 0) or 4 bytes (record indexes, empty sentinel `u32::MAX`).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory_map::MemoryMap;
use crate::{FILE_PREFIX_SIZE, RECORD_EMPTY, SLAB_EMPTY};

/// The fixed bucket array of a hash table.
pub struct TableHeader {
    map: Arc<MemoryMap>,
    buckets: u64,
    entry_size: u64,
    empty: u64,
}

impl TableHeader {
    /// Header for a slab table: 8-byte entries, empty sentinel 0.
    pub fn slab(map: Arc<MemoryMap>, buckets: u64) -> Self {
        debug_assert!(buckets > 0);
        Self { map, buckets, entry_size: 8, empty: SLAB_EMPTY }
    }

    /// Header for a record table: 4-byte entries, empty sentinel
    /// `u32::MAX`.
    pub fn record(map: Arc<MemoryMap>, buckets: u64) -> Self {
        debug_assert!(buckets > 0);
        Self { map, buckets, entry_size: 4, empty: u64::from(RECORD_EMPTY) }
    }

    /// The bucket array size in bytes (excludes the payload-size cell).
    pub fn size(&self) -> u64 {
        self.buckets * self.entry_size
    }

    /// The configured bucket count.
    pub fn buckets(&self) -> u64 {
        self.buckets
    }

    /// The empty sentinel for this header's entry width.
    pub fn empty(&self) -> u64 {
        self.empty
    }

    /// Initialize every bucket to the empty sentinel.
    ///
    /// Both sentinels are uniform byte patterns (0x00 for slab offsets,
    /// 0xff for record indexes), so the array is filled in chunks rather
    /// than entry by entry.
    pub fn create(&self) -> Result<()> {
        self.map.reserve(FILE_PREFIX_SIZE + self.size())?;

        let fill = if self.empty == 0 { 0x00u8 } else { 0xffu8 };
        let chunk = [fill; 4096];
        let memory = self.map.access(FILE_PREFIX_SIZE)?;

        let mut written = 0usize;
        let total = self.size() as usize;
        while written < total {
            let step = chunk.len().min(total - written);
            memory.write_bytes(written, &chunk[..step]);
            written += step;
        }
        Ok(())
    }

    /// Validate the bucket array against an existing file.
    pub fn start(&self) -> Result<()> {
        let end = FILE_PREFIX_SIZE + self.size();
        if end > self.map.size() {
            return Err(Error::Corrupted {
                reason: format!(
                    "bucket array needs {end} bytes, file has {} (bucket count mismatch?)",
                    self.map.size()
                ),
            });
        }
        Ok(())
    }

    /// Read a bucket head.
    pub fn read(&self, bucket: u64) -> Result<u64> {
        debug_assert!(bucket < self.buckets);
        let memory = self.map.access(FILE_PREFIX_SIZE + bucket * self.entry_size)?;
        Ok(match self.entry_size {
            4 => u64::from(memory.read_u32(0)),
            _ => memory.read_u64(0),
        })
    }

    /// Write a bucket head.
    pub fn write(&self, bucket: u64, value: u64) -> Result<()> {
        debug_assert!(bucket < self.buckets);
        let memory = self.map.access(FILE_PREFIX_SIZE + bucket * self.entry_size)?;
        match self.entry_size {
            4 => memory.write_u32(0, value as u32),
            _ => memory.write_u64(0, value),
        }
        Ok(())
    }

    /// Select the bucket for a key: `key mod buckets`, with the key read as
    /// a little-endian unsigned integer of arbitrary width.
    pub fn bucket_of(&self, key: &[u8]) -> u64 {
        remainder(key, self.buckets)
    }
}

/// Multi-limb Horner remainder of a little-endian key.
///
/// Wide keys (32-byte hashes) must distribute uniformly over any bucket
/// count, so the modulus is taken over the whole key, most significant
/// byte first. Intermediates fit u128: `acc < buckets <= u64::MAX`.
fn remainder(key: &[u8], buckets: u64) -> u64 {
    debug_assert!(buckets > 0);
    let modulus = u128::from(buckets);
    let mut acc: u128 = 0;
    for &byte in key.iter().rev() {
        acc = ((acc << 8) | u128::from(byte)) % modulus;
    }
    acc as u64
}
