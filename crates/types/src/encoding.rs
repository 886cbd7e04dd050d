//! Little-endian byte codecs.
//!
//! [`Writer`] appends to an owned buffer; [`Reader`] is a cursor over a
//! borrowed slice. Variable-length integers use the compact-size scheme
//! (1/3/5/9 bytes with 0xfd/0xfe/0xff markers) so record bodies are
//! self-delimiting.
//!
//! Reads return `Err` on truncation instead of panicking: readers frequently
//! parse straight out of memory-mapped records, where a short read means
//! store corruption, not a bug.

use snafu::Snafu;

use crate::hash::{Hash256, ShortHash};

/// Result alias for decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoding failures.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The input ended before the requested field.
    #[snafu(display("unexpected end of input at offset {offset} (wanted {wanted} bytes)"))]
    UnexpectedEnd {
        /// Cursor position when the read was attempted.
        offset: usize,
        /// Bytes the field required.
        wanted: usize,
    },

    /// A length prefix exceeds the remaining input.
    #[snafu(display("length prefix {length} exceeds remaining input at offset {offset}"))]
    OversizedLength {
        /// Cursor position of the length prefix.
        offset: usize,
        /// The declared length.
        length: u64,
    },
}

/// Appending encoder over an owned byte buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: Vec::with_capacity(capacity) }
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a compact-size variable-length integer.
    pub fn put_varint(&mut self, value: u64) {
        match value {
            0..=0xfc => self.put_u8(value as u8),
            0xfd..=0xffff => {
                self.put_u8(0xfd);
                self.put_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.put_u8(0xfe);
                self.put_u32(value as u32);
            }
            _ => {
                self.put_u8(0xff);
                self.put_u64(value);
            }
        }
    }

    /// Write a varint length prefix followed by the bytes.
    pub fn put_varbytes(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.put_bytes(bytes);
    }
}

/// Cursor decoder over a borrowed byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader at the start of `input`.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes remaining past the cursor.
    pub fn remaining(&self) -> usize {
        self.input.len() - self.offset
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8]> {
        if self.remaining() < wanted {
            return Err(Error::UnexpectedEnd { offset: self.offset, wanted });
        }
        let bytes = &self.input[self.offset..self.offset + wanted];
        self.offset += wanted;
        Ok(bytes)
    }

    /// Advance the cursor without reading.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn get_hash(&mut self) -> Result<Hash256> {
        let bytes = self.take(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(hash)
    }

    pub fn get_short_hash(&mut self) -> Result<ShortHash> {
        let bytes = self.take(20)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(bytes);
        Ok(hash)
    }

    /// Read a compact-size variable-length integer.
    pub fn get_varint(&mut self) -> Result<u64> {
        match self.get_u8()? {
            0xfd => Ok(u64::from(self.get_u16()?)),
            0xfe => Ok(u64::from(self.get_u32()?)),
            0xff => self.get_u64(),
            byte => Ok(u64::from(byte)),
        }
    }

    /// Read a varint length prefix and the following bytes.
    pub fn get_varbytes(&mut self) -> Result<&'a [u8]> {
        let start = self.offset;
        let length = self.get_varint()?;
        if length > self.remaining() as u64 {
            return Err(Error::OversizedLength { offset: start, length });
        }
        self.take(length as usize)
    }

    /// Skip a varint-prefixed byte string.
    pub fn skip_varbytes(&mut self) -> Result<()> {
        self.get_varbytes().map(|_| ())
    }
}
