//! Error types for the store primitives.

use std::io;

use snafu::Snafu;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the mapping and table layers.
///
/// A miss (key not found, empty chain) is not an error — lookups return
/// `Option`. These variants all indicate I/O failure or structural
/// corruption; callers inside a write critical section must treat them as
/// fatal and leave the flush lock in place.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying file.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A persisted size, count or link disagrees with the file.
    #[snafu(display("corrupted store: {reason}"))]
    Corrupted {
        /// Description of what was inconsistent.
        reason: String,
    },

    /// The memory map could not be flushed; the mapping must be treated as
    /// corrupt by the caller.
    #[snafu(display("flush failed for {path}: {source}"))]
    Flush {
        /// The file that failed to flush.
        path: String,
        /// The underlying I/O error.
        source: io::Error,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}
