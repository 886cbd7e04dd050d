//! Shared fixtures for the chain store integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::path::Path;

use chaindb_types::{script, Block, Hash256, Header, Point, Script, Settings, Transaction, TxIn, TxOut};

/// Settings sized for tests: small tables, fast growth, indexing on.
pub fn settings(directory: &Path) -> Settings {
    let mut settings = Settings::with_directory(directory);
    settings.block_table_buckets = 101;
    settings.transaction_table_buckets = 503;
    settings.spend_table_buckets = 503;
    settings.history_table_buckets = 101;
    settings.cache_capacity = 1_000;
    settings
}

/// A unique coinbase paying `value` to the address `[tag; 20]`.
pub fn coinbase(tag: u64, value: u64) -> Transaction {
    Transaction {
        version: 1,
        locktime: 0,
        inputs: vec![TxIn {
            previous_output: Point::null(),
            script: Script::new(tag.to_le_bytes().to_vec()),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value,
            script: script::pay_to_short_hash([tag as u8; 20]),
        }],
    }
}

/// A transaction spending `prevout` into `outputs` pay-to-short-hash
/// outputs addressed `[tag; 20]`, `[tag + 1; 20]`, …
pub fn spend_transaction(prevout: Point, tag: u8, outputs: usize) -> Transaction {
    Transaction {
        version: 1,
        locktime: 0,
        inputs: vec![TxIn { previous_output: prevout, script: Script::default(), sequence: 0 }],
        outputs: (0..outputs)
            .map(|index| TxOut {
                value: 1_000 + index as u64,
                script: script::pay_to_short_hash([tag + index as u8; 20]),
            })
            .collect(),
    }
}

/// Build a block on `previous` with the given transactions.
pub fn next_block(previous: Hash256, nonce: u32, transactions: Vec<Transaction>) -> Block {
    let hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
    let header = Header {
        version: 1,
        previous_block_hash: previous,
        merkle_root: chaindb_types::merkle_root(&hashes),
        timestamp: 1_600_000_000 + nonce,
        bits: 0x1d00_ffff,
        nonce,
    };
    Block::new(header, transactions)
}

/// The outpoint of output `index` of `transaction`.
pub fn outpoint(transaction: &Transaction, index: u32) -> Point {
    Point::new(transaction.hash(), index)
}
