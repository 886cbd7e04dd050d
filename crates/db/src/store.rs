//! Filesystem-level write coordination: lock sentinels and file naming.
//!
//! Two presence-only files govern the store directory:
//!
//! - `exclusive_lock` — held for the lifetime of an open store; a second
//!   open of the same directory fails. One writer process is assumed, so
//!   this is an existence check, not an advisory OS lock.
//! - `flush_lock` — exists exactly while a write is in progress. A crash
//!   mid-write leaves it behind, and every subsequent open refuses to
//!   proceed until an operator intervenes (I7).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Sentinel present while a write is in flight (or crashed).
const FLUSH_LOCK: &str = "flush_lock";
/// Sentinel present while a store instance is open.
const EXCLUSIVE_LOCK: &str = "exclusive_lock";

/// Block database files.
pub const BLOCK_TABLE: &str = "block_table";
pub const HEADER_INDEX: &str = "header_index";
pub const BLOCK_INDEX: &str = "block_index";
pub const TRANSACTION_INDEX: &str = "transaction_index";

/// Transaction database file.
pub const TRANSACTION_TABLE: &str = "transaction_table";

/// Optional index files.
pub const SPEND_TABLE: &str = "spend_table";
pub const HISTORY_TABLE: &str = "history_table";
pub const HISTORY_ROWS: &str = "history_rows";
pub const STEALTH_ROWS: &str = "stealth_rows";

/// Per-directory lock-file management.
pub struct Store {
    directory: PathBuf,
}

impl Store {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// The path of a named store file.
    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// Acquire the directory: refuse a crashed store, then take the
    /// exclusive lock.
    ///
    /// # Errors
    ///
    /// [`Error::CrashedStore`] when the flush lock is present,
    /// [`Error::LockedStore`] when another instance holds the directory.
    pub fn open(&self) -> Result<()> {
        fs::create_dir_all(&self.directory)?;

        let flush_lock = self.path(FLUSH_LOCK);
        if flush_lock.exists() {
            return Err(Error::CrashedStore { path: flush_lock.display().to_string() });
        }

        let exclusive = self.path(EXCLUSIVE_LOCK);
        match fs::OpenOptions::new().write(true).create_new(true).open(&exclusive) {
            Ok(_) => {
                debug!(path = %exclusive.display(), "exclusive lock acquired");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::LockedStore { path: exclusive.display().to_string() })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Release the exclusive lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        remove_if_present(&self.path(EXCLUSIVE_LOCK))?;
        Ok(())
    }

    /// Mark a write in progress: create the flush-lock sentinel.
    pub fn begin_write(&self) -> Result<()> {
        fs::OpenOptions::new().write(true).create(true).open(self.path(FLUSH_LOCK))?;
        Ok(())
    }

    /// Mark a write complete: remove the flush-lock sentinel.
    ///
    /// Callers invoke this only after every sub-database commit succeeded;
    /// on any failure the sentinel stays behind as the recovery signal.
    pub fn end_write(&self) -> Result<()> {
        fs::remove_file(self.path(FLUSH_LOCK))?;
        Ok(())
    }

    /// Whether the flush-lock sentinel is present.
    pub fn write_in_progress(&self) -> bool {
        self.path(FLUSH_LOCK).exists()
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
