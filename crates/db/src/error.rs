//! Error types for the chain databases and coordinator.

use std::io;

use snafu::Snafu;

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the chain store.
///
/// Preflight rejections (`EmptyBlock`, `BlockInvalidHeight`,
/// `BlockMissingParent`, `UnspentDuplicate`) happen before `begin_write`
/// and leave the store untouched. Everything else inside a write critical
/// section is fatal: the write aborts without `end_write` and the flush
/// lock stays on disk until operator recovery.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Structural failure in the underlying store primitives.
    #[snafu(display("store failure: {source}"))]
    Store {
        /// The failing primitive operation.
        source: chaindb_store::Error,
    },

    /// I/O failure outside the mapping layer (lock files, directories).
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Generic fatal store inconsistency.
    #[snafu(display("operation failed: {reason}"))]
    Operation {
        /// What was inconsistent.
        reason: String,
    },

    /// A previous write crashed: the flush-lock sentinel is present.
    #[snafu(display("store requires recovery: flush lock present at {path}"))]
    CrashedStore {
        /// The sentinel file path.
        path: String,
    },

    /// Another instance holds the store's exclusive lock.
    #[snafu(display("store is locked: exclusive lock present at {path}"))]
    LockedStore {
        /// The sentinel file path.
        path: String,
    },

    /// A block push carried no transactions.
    #[snafu(display("block has no transactions"))]
    EmptyBlock,

    /// A push or pop height disagrees with the current chain top.
    #[snafu(display("height {height} disagrees with the chain top"))]
    BlockInvalidHeight {
        /// The offered height.
        height: u32,
    },

    /// A pushed header or block does not connect to its parent.
    #[snafu(display("no parent for block at height {height}"))]
    BlockMissingParent {
        /// The offered height.
        height: u32,
    },

    /// A transaction with this hash already exists with unspent outputs.
    #[snafu(display("duplicate transaction with unspent outputs"))]
    UnspentDuplicate,
}

impl From<chaindb_store::Error> for Error {
    fn from(source: chaindb_store::Error) -> Self {
        Error::Store { source }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<chaindb_types::encoding::Error> for Error {
    fn from(source: chaindb_types::encoding::Error) -> Self {
        // A record that fails structural decode is corrupt by definition.
        Error::Operation { reason: format!("record decode: {source}") }
    }
}

/// Shorthand for [`Error::Operation`].
pub(crate) fn operation_failed(reason: impl Into<String>) -> Error {
    Error::Operation { reason: reason.into() }
}
