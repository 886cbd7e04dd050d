//! chaindb-store: memory-mapped, hash-indexed storage primitives.
//!
//! The engine stores every table as a growable memory-mapped file with a
//! common prefix layout:
//!
//! ```text
//! ┌──────────────────────┬───────────────────────┬───────────────────────┐
//! │ payload size : u64   │ bucket array          │ slabs / records       │
//! │ (high-water mark)    │ (hash tables only)    │                       │
//! └──────────────────────┴───────────────────────┴───────────────────────┘
//! ```
//!
//! Layering, leaves first:
//!
//! - [`memory_map`] — a file mapping that grows multiplicatively and hands
//!   out [`Memory`](memory_map::Memory) borrow handles. A handle pins the
//!   mapping against remap for as long as it lives; growth takes the remap
//!   lock exclusively.
//! - [`slab_manager`] / [`record_manager`] — sub-allocators: byte-granular
//!   slabs addressed by file offset, and fixed-size records addressed by a
//!   32-bit index. Both persist their high-water mark on `sync`.
//! - [`table_header`] — the fixed bucket array, plus the multi-limb key
//!   modulus that spreads wide keys over any bucket count.
//! - [`slab_table`] / [`record_table`] — hash tables with singly linked
//!   collision chains. `store` prepends, so duplicate keys resolve most
//!   recent first.
//! - [`multimap`] — a record table whose value is the head of a per-key
//!   LIFO list of records, with an exact-inverse delete for reorg unwind.
//!
//! # Safety model
//!
//! Rows are written into shared mappings through raw pointers. The
//! soundness argument is external discipline, not the type system:
//! a single coordinated writer mutates rows, chain heads change only under
//! a per-table link mutex, and mutable metadata fields are guarded by the
//! owning database's locks. Readers may observe torn values only in fields
//! documented as unguarded. Every dereference goes through a [`Memory`]
//! handle, so no pointer survives a remap.

pub mod error;
pub mod memory_map;
pub mod multimap;
pub mod record_manager;
pub mod record_table;
pub mod slab_manager;
pub mod slab_table;
pub mod table_header;

pub use error::{Error, Result};
pub use memory_map::{Memory, MemoryMap};
pub use multimap::RecordMultimap;
pub use record_manager::RecordManager;
pub use record_table::RecordTable;
pub use slab_manager::SlabManager;
pub use slab_table::SlabTable;
pub use table_header::TableHeader;

/// Byte position of a slab within its file.
pub type FileOffset = u64;

/// Position of a fixed-size record within its file.
pub type RecordIndex = u32;

/// Chain terminator / empty bucket for slab tables. Offset zero is always
/// file metadata, so no slab can legitimately live there.
pub const SLAB_EMPTY: FileOffset = 0;

/// Chain terminator / empty bucket for record tables.
pub const RECORD_EMPTY: RecordIndex = RecordIndex::MAX;

/// Size of the payload-size cell at the head of every data file.
pub const FILE_PREFIX_SIZE: u64 = 8;
