//! Lifecycle and recovery: open/close idempotence, the flush-lock crash
//! protocol, and growth under concurrent readers.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use tempfile::tempdir;

use chaindb::{ChainIndex, Coordinator, Error, TransactionState};
use chaindb_types::Block;

use common::{coinbase, next_block, outpoint, settings};

/// P2: close then reopen answers all previous queries identically.
#[test]
fn test_reopen_preserves_state() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let funding = coinbase(1, 25_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);

    {
        let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();
        store.push_block(&block_one, 1).unwrap();
        store.close().unwrap();
    }

    let store = Coordinator::open(settings(dir.path())).unwrap();
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(1));
    assert_eq!(store.blocks().top(ChainIndex::Header), Some(0));
    assert_eq!(
        store.blocks().get(1, ChainIndex::Block).unwrap().unwrap().hash(),
        block_one.hash()
    );

    let result = store.transactions().get(&funding.hash()).unwrap().unwrap();
    assert_eq!(result.state(), TransactionState::Confirmed);
    assert_eq!(result.height(), 1);
    assert_eq!(result.transaction().unwrap(), funding);

    let rows = store.history().unwrap().get(&[1; 20], 0, 0).unwrap();
    assert_eq!(rows.len(), 1);
}

/// P2: close is idempotent, and writes after close are refused.
#[test]
fn test_close_is_idempotent() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    store.close().unwrap();
    store.close().unwrap();

    let block_one = next_block(genesis.hash(), 1, vec![coinbase(1, 1_000)]);
    assert!(store.push_block(&block_one, 1).is_err());
}

/// Only one instance may hold a store directory.
#[test]
fn test_exclusive_lock_blocks_second_open() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    assert!(matches!(
        Coordinator::open(settings(dir.path())),
        Err(Error::LockedStore { .. })
    ));

    store.close().unwrap();
    Coordinator::open(settings(dir.path())).unwrap();
}

/// P6: a crash between begin_write and end_write leaves the flush lock
/// behind, and a subsequent open fails until the operator removes it.
#[test]
fn test_crashed_write_blocks_reopen() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    {
        let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();
        store.close().unwrap();
    }

    // Simulate the crash artifact: a write began and never completed.
    std::fs::File::create(dir.path().join("flush_lock")).unwrap();

    assert!(matches!(
        Coordinator::open(settings(dir.path())),
        Err(Error::CrashedStore { .. })
    ));

    // Operator recovery: remove the sentinel and the store opens again.
    std::fs::remove_file(dir.path().join("flush_lock")).unwrap();
    let store = Coordinator::open(settings(dir.path())).unwrap();
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(0));
}

/// Flush-on-commit settings leave no sentinel after successful writes.
#[test]
fn test_flush_writes_mode_completes_cleanly() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let mut settings = settings(dir.path());
    settings.flush_writes = true;

    let store = Coordinator::create(settings, &genesis).unwrap();
    let block_one = next_block(genesis.hash(), 1, vec![coinbase(1, 1_000)]);
    store.push_block(&block_one, 1).unwrap();

    assert!(!dir.path().join("flush_lock").exists());
}

/// Scenario 6: sustained pushes force file growth while a concurrent
/// reader keeps resolving a known transaction.
#[test]
fn test_growth_under_concurrent_reads() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Arc::new(Coordinator::create(settings(dir.path()), &genesis).unwrap());

    let known = coinbase(1, 42_000);
    let block_one = next_block(genesis.hash(), 1, vec![known.clone()]);
    store.push_block(&block_one, 1).unwrap();
    let known_hash = known.hash();

    let reader = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..2_000 {
                let result = store.transactions().get(&known_hash).unwrap().expect("known tx");
                let transaction = result.transaction().unwrap();
                assert_eq!(transaction.hash(), known_hash);
            }
        })
    };

    // Each block carries enough payload to exhaust the initial mappings
    // several times over.
    let mut previous = block_one.hash();
    for height in 2..40u32 {
        let transactions: Vec<_> =
            (0..25).map(|tag| coinbase(u64::from(height) * 1_000 + tag, 5_000)).collect();
        let block = next_block(previous, height, transactions);
        store.push_block(&block, height).unwrap();
        previous = block.hash();
    }

    reader.join().unwrap();

    // Spot-check the oldest and newest records after all remaps.
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(39));
    let early = store.transactions().get(&known_hash).unwrap().unwrap();
    assert_eq!(early.height(), 1);
    assert!(store
        .transactions()
        .get_output(&outpoint(&known, 0), u32::MAX)
        .unwrap()
        .is_some());
}
