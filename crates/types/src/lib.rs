//! chaindb-types: domain types for the chaindb storage engine.
//!
//! This crate defines the byte-level vocabulary shared by the store
//! primitives and the chain databases:
//!
//! - **Hashes**: double-SHA-256 block/transaction hashes and the 20-byte
//!   short hashes used as address-index keys.
//! - **Chain types**: headers, transactions, blocks and points, each with a
//!   canonical little-endian encoding. The encodings here are the *wire*
//!   forms (hash preimages); database record layouts live with the
//!   databases that own them.
//! - **Encoding**: a small reader/writer pair for little-endian integers,
//!   compact varints and length-prefixed byte strings.
//! - **Script inspection**: the minimal pattern matching the address and
//!   stealth indexes need. Scripts are otherwise opaque; evaluation is not
//!   this crate's concern.
//! - **Settings**: store configuration with serde defaults and validation.

pub mod chain;
pub mod encoding;
pub mod hash;
pub mod script;
pub mod settings;

pub use chain::{Block, Header, Point, Script, Transaction, TxIn, TxOut};
pub use encoding::{Reader, Writer};
pub use hash::{bitcoin_hash, merkle_root, Hash256, ShortHash, NULL_HASH};
pub use settings::Settings;
