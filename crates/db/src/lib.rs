//! chaindb: the on-disk storage engine of a blockchain node.
//!
//! Persists the block tree, the transaction universe (confirmed,
//! header-indexed, pool-resident, invalid) and optional secondary indexes
//! (spends, payment history, stealth) as memory-mapped hash-indexed files,
//! built on [`chaindb_store`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Coordinator                     │
//! │  (write sequencing, push/pop/reorg, fan-out)    │
//! └──────┬──────────┬──────────┬─────────┬──────────┘
//!        │          │          │         │
//! ┌──────▼───┐ ┌────▼─────┐ ┌──▼────┐ ┌──▼───────────┐
//! │  blocks  │ │   txs    │ │spends │ │history/stealth│
//! └──────┬───┘ └────┬─────┘ └──┬────┘ └──┬───────────┘
//!        │          │          │         │
//! ┌──────▼──────────▼──────────▼─────────▼──────────┐
//! │   chaindb-store: mmap slab/record hash tables    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! One writer, many readers. Writers serialize on the coordinator's write
//! mutex and run under the flush-lock protocol: the sentinel file exists
//! exactly while a write is in flight, so a crash mid-write is detected on
//! the next open. Readers enter the databases directly and pin mappings
//! through accessor handles; the per-record atomic triple is their
//! consistency anchor.

pub mod block;
pub mod cache;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod spend;
pub mod stealth;
pub mod store;
pub mod transaction;

pub use block::{BlockDatabase, BlockResult, ChainIndex};
pub use cache::UnspentOutputs;
pub use coordinator::{Coordinator, ForkPoint};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use history::{HistoryDatabase, PaymentRow, PointKind};
pub use spend::SpendDatabase;
pub use stealth::{PrefixFilter, StealthDatabase, StealthRow};
pub use store::Store;
pub use transaction::{
    Prevout, TransactionDatabase, TransactionResult, TransactionState, NOT_SPENT, UNCONFIRMED,
    UNRESTRICTED, UNVERIFIED,
};
