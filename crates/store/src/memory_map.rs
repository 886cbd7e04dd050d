//! Growable memory-mapped file with remap-safe borrow handles.
//!
//! The mapping always covers the file's full physical size. Growth is
//! multiplicative (`reserve` rounds the requested size up by the configured
//! growth rate), so remaps are amortized-rare. A remap invalidates every
//! address previously handed out, which is why dereferencing is only
//! possible through [`Memory`]: the handle holds the remap lock shared and
//! the resize path takes it exclusively, so a mapping can never move while
//! a handle is alive.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::{ptr, slice};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::error::{Error, Result};

/// Smallest file we will map: the payload-size cell must always exist.
const MINIMUM_SIZE: u64 = crate::FILE_PREFIX_SIZE;

struct MapInner {
    file: File,
    map: MmapMut,
    /// Current physical (mapped) size in bytes.
    size: u64,
}

/// A memory-mapped file that grows by a configured multiplier.
pub struct MemoryMap {
    inner: RwLock<MapInner>,
    path: PathBuf,
    growth_rate: f64,
}

impl MemoryMap {
    /// Open (creating if absent) and map the file at `path`.
    ///
    /// `growth_rate` is the expansion multiplier applied by [`reserve`]
    /// (validated upstream to be >= 1.0).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened, sized or mapped.
    ///
    /// [`reserve`]: MemoryMap::reserve
    pub fn open(path: impl AsRef<Path>, growth_rate: f64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        let mut size = file.metadata()?.len();
        if size < MINIMUM_SIZE {
            size = MINIMUM_SIZE;
            file.set_len(size)?;
        }

        let map = map_file(&file, size)?;
        debug!(path = %path.display(), size, "mapped");

        Ok(Self { inner: RwLock::new(MapInner { file, map, size }), path, growth_rate })
    }

    /// The file's current physical (mapped) size.
    pub fn size(&self) -> u64 {
        self.inner.read().size
    }

    /// Ensure at least `required` bytes are mapped, growing by the
    /// configured rate when they are not.
    ///
    /// Takes the remap lock exclusively on the growth path, so the caller
    /// must not hold any [`Memory`] for this map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if truncation or remapping fails.
    pub fn reserve(&self, required: u64) -> Result<()> {
        if required <= self.inner.read().size {
            return Ok(());
        }

        let target = (required as f64 * self.growth_rate).ceil() as u64;
        self.resize(target)
    }

    /// Grow the file and mapping to `new_size` bytes.
    ///
    /// Shrinking is not supported; a smaller request is a no-op. Blocks
    /// until all outstanding accessors are dropped.
    pub fn resize(&self, new_size: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if new_size <= inner.size {
            return Ok(());
        }

        inner.file.set_len(new_size)?;
        inner.map = map_file(&inner.file, new_size)?;
        inner.size = new_size;
        debug!(path = %self.path.display(), new_size, "remapped");
        Ok(())
    }

    /// Synchronously flush mapped pages, then the file descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Flush`]; the caller must then treat the mapping as
    /// corrupt.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        inner
            .map
            .flush()
            .and_then(|_| inner.file.sync_all())
            .map_err(|source| Error::Flush { path: self.path.display().to_string(), source })
    }

    /// Flush prior to release. Idempotent; the mapping itself is released
    /// when the value drops.
    pub fn close(&self) -> Result<()> {
        self.flush()
    }

    /// Borrow the mapping at the given absolute byte offset.
    ///
    /// The handle pins the mapping (shared remap lock) until dropped.
    /// Recursive acquisition from one thread is permitted so that a reader
    /// already holding a handle cannot deadlock behind a queued resize.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if `offset` lies beyond the mapping —
    /// a persisted link pointing outside the file.
    pub fn access(&self, offset: u64) -> Result<Memory<'_>> {
        let guard = self.inner.read_recursive();
        if offset > guard.size {
            return Err(Error::Corrupted {
                reason: format!(
                    "offset {offset} beyond mapped size {} of {}",
                    guard.size,
                    self.path.display()
                ),
            });
        }
        Ok(Memory { guard, offset: offset as usize })
    }
}

impl Drop for MemoryMap {
    fn drop(&mut self) {
        // Matches the mapping contract: close flushes, drop unmaps. Flush
        // failure here has no recovery path beyond the flush-lock sentinel
        // the coordinator already maintains.
        if let Err(error) = self.flush() {
            tracing::error!(path = %self.path.display(), %error, "flush on drop failed");
        }
    }
}

fn map_file(file: &File, size: u64) -> Result<MmapMut> {
    debug_assert!(size >= MINIMUM_SIZE);
    // SAFETY: the mapping is private to this process (single-writer store
    // contract); all access goes through `Memory`, which cannot outlive
    // the mapping it borrows.
    let map = unsafe { MmapMut::map_mut(file)? };
    Ok(map)
}

/// A borrowed window into a mapped file, anchored at a fixed offset.
///
/// All accessor offsets are relative to the anchor. Reads and writes are
/// unaligned little-endian through raw pointers: the mapping is shared, and
/// which fields may be concurrently mutated is governed by the owning
/// table's locking discipline, not by this type.
pub struct Memory<'a> {
    guard: RwLockReadGuard<'a, MapInner>,
    offset: usize,
}

impl Memory<'_> {
    /// The absolute file offset this handle is anchored at.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    fn base(&self, at: usize, len: usize) -> *mut u8 {
        let position = self.offset + at;
        assert!(
            position + len <= self.guard.size as usize,
            "access [{position}, +{len}) beyond mapped size {}",
            self.guard.size
        );
        // MmapMut grants write access to the whole range; the const cast
        // only bypasses the &mut self requirement, which cannot be met for
        // a shared mapping.
        let base = self.guard.map.as_ptr() as *mut u8;
        // SAFETY: position + len bounds-checked above.
        unsafe { base.add(position) }
    }

    /// View `len` bytes starting `at` bytes past the anchor.
    pub fn bytes(&self, at: usize, len: usize) -> &[u8] {
        let base = self.base(at, len);
        // SAFETY: bounds asserted in `base`; lifetime bound to the guard.
        unsafe { slice::from_raw_parts(base, len) }
    }

    /// View from `at` bytes past the anchor to the end of the mapping.
    ///
    /// Structural decoders use this: slab payloads are self-delimiting, so
    /// the reader stops well before the mapping ends.
    pub fn tail(&self, at: usize) -> &[u8] {
        let len = self.guard.size as usize - (self.offset + at);
        self.bytes(at, len)
    }

    pub fn read_u8(&self, at: usize) -> u8 {
        self.bytes(at, 1)[0]
    }

    pub fn read_u16(&self, at: usize) -> u16 {
        LittleEndian::read_u16(self.bytes(at, 2))
    }

    pub fn read_u32(&self, at: usize) -> u32 {
        LittleEndian::read_u32(self.bytes(at, 4))
    }

    pub fn read_u64(&self, at: usize) -> u64 {
        LittleEndian::read_u64(self.bytes(at, 8))
    }

    /// Copy `bytes` into the mapping at the given relative offset.
    pub fn write_bytes(&self, at: usize, bytes: &[u8]) {
        let base = self.base(at, bytes.len());
        // SAFETY: bounds asserted; overlap impossible (source is a heap or
        // stack buffer, never the mapping itself).
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), base, bytes.len()) };
    }

    pub fn write_u8(&self, at: usize, value: u8) {
        self.write_bytes(at, &[value]);
    }

    pub fn write_u16(&self, at: usize, value: u16) {
        self.write_bytes(at, &value.to_le_bytes());
    }

    pub fn write_u32(&self, at: usize, value: u32) {
        self.write_bytes(at, &value.to_le_bytes());
    }

    pub fn write_u64(&self, at: usize, value: u64) {
        self.write_bytes(at, &value.to_le_bytes());
    }
}
