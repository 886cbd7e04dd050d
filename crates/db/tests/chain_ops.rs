//! End-to-end chain operations: push, pop, reorganization, indexing.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use tempfile::tempdir;

use chaindb::{
    ChainIndex, Coordinator, Dispatcher, Error, ForkPoint, PointKind, TransactionState,
    NOT_SPENT, UNCONFIRMED, UNRESTRICTED,
};
use chaindb_types::{script, Block, Point};

use common::{coinbase, next_block, outpoint, settings, spend_transaction};

/// Scenario 1: empty genesis bootstrap.
#[test]
fn test_create_seeds_genesis() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    assert_eq!(store.blocks().top(ChainIndex::Header), Some(0));
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(0));

    let result = store.transactions().get(&genesis.transactions[0].hash()).unwrap().unwrap();
    assert_eq!(result.state(), TransactionState::Confirmed);
    assert_eq!(result.height(), 0);
    assert_eq!(result.position(), 0);

    // P9: the genesis coinbase output is never spendable.
    let point = outpoint(&genesis.transactions[0], 0);
    assert!(store.transactions().get_output(&point, UNRESTRICTED).unwrap().is_none());
    assert!(store.transactions().get_output(&point, 1_000).unwrap().is_none());
}

/// Scenario 2: pool a transaction, then confirm it in a block.
#[test]
fn test_pool_then_confirm() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    // Fund with a block whose coinbase we can spend.
    let funding = coinbase(1, 50_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);
    store.push_block(&block_one, 1).unwrap();

    let tx = spend_transaction(outpoint(&funding, 0), 10, 2);
    store.push_transaction(&tx, 1).unwrap();

    let pooled = store.transactions().get(&tx.hash()).unwrap().unwrap();
    assert_eq!(pooled.state(), TransactionState::Pooled);
    assert_eq!(pooled.height(), 1); // the fork set
    assert_eq!(pooled.position(), UNCONFIRMED);

    // Confirm at position 3 of the next block.
    let block_two = next_block(
        block_one.hash(),
        2,
        vec![coinbase(2, 50_000), coinbase(3, 50_000), coinbase(4, 50_000), tx.clone()],
    );
    store.push_block(&block_two, 2).unwrap();

    let confirmed = store.transactions().get(&tx.hash()).unwrap().unwrap();
    assert_eq!(confirmed.state(), TransactionState::Confirmed);
    assert_eq!(confirmed.height(), 2);
    assert_eq!(confirmed.position(), 3);

    // The cache serves the confirmed outputs.
    assert!(!store.transactions().cache().is_empty());
    let prevout = store.transactions().get_output(&outpoint(&tx, 0), 2).unwrap().unwrap();
    assert!(prevout.confirmed);
    assert!(!prevout.spent);
}

/// P1: pushing blocks and popping them in reverse restores the store's
/// observable state; re-pushing reconfirms the same records.
#[test]
fn test_push_pop_round_trip() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    let funding = coinbase(1, 80_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);
    let spender = spend_transaction(outpoint(&funding, 0), 20, 1);
    let block_two = next_block(block_one.hash(), 2, vec![coinbase(2, 80_000), spender.clone()]);

    store.push_block(&block_one, 1).unwrap();
    store.push_block(&block_two, 2).unwrap();

    // The funding output is spent by block two.
    let spent =
        store.transactions().get(&funding.hash()).unwrap().unwrap().output(0).unwrap().unwrap();
    assert_eq!(spent.spender_height, 2);

    let popped_two = store.pop_block(2).unwrap();
    assert_eq!(popped_two, block_two);
    let popped_one = store.pop_block(1).unwrap();
    assert_eq!(popped_one, block_one);

    // Tops restored; popped transactions demoted; spends unwound (P7).
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(0));
    let funding_result = store.transactions().get(&funding.hash()).unwrap().unwrap();
    assert_eq!(funding_result.state(), TransactionState::Pooled);
    assert_eq!(funding_result.output(0).unwrap().unwrap().spender_height, NOT_SPENT);

    // The history index unwound to empty for every touched address.
    let history = store.history().unwrap();
    assert!(history.get(&[1; 20], 0, 0).unwrap().is_empty());
    assert!(history.get(&[20; 20], 0, 0).unwrap().is_empty());

    // Re-pushing reconfirms the same records at the same coordinates.
    store.push_block(&block_one, 1).unwrap();
    store.push_block(&block_two, 2).unwrap();
    let reconfirmed = store.transactions().get(&spender.hash()).unwrap().unwrap();
    assert_eq!(reconfirmed.state(), TransactionState::Confirmed);
    assert_eq!(reconfirmed.height(), 2);
    assert_eq!(reconfirmed.position(), 1);
}

/// Preflight failures: wrong height, wrong parent, empty block.
#[test]
fn test_push_preflights() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    let block_one = next_block(genesis.hash(), 1, vec![coinbase(1, 1_000)]);

    assert!(matches!(
        store.push_block(&block_one, 5),
        Err(Error::BlockInvalidHeight { height: 5 })
    ));

    let orphan = next_block([0xee; 32], 2, vec![coinbase(2, 1_000)]);
    assert!(matches!(store.push_block(&orphan, 1), Err(Error::BlockMissingParent { .. })));

    let empty = next_block(genesis.hash(), 3, vec![]);
    assert!(matches!(store.push_block(&empty, 1), Err(Error::EmptyBlock)));

    // Nothing was written: the chain still tops at genesis and no
    // flush-lock sentinel was left behind.
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(0));
    assert!(!dir.path().join("flush_lock").exists());
}

/// Scenario 4: a pooled push of a duplicate hash with unspent outputs is
/// rejected.
#[test]
fn test_unspent_duplicate_rejected() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    let funding = coinbase(1, 9_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);
    store.push_block(&block_one, 1).unwrap();

    assert!(matches!(store.push_transaction(&funding, 1), Err(Error::UnspentDuplicate)));

    // Spend the only output; the duplicate then becomes acceptable.
    let spender = spend_transaction(outpoint(&funding, 0), 30, 1);
    let block_two = next_block(block_one.hash(), 2, vec![coinbase(2, 9_000), spender]);
    store.push_block(&block_two, 2).unwrap();

    store.push_transaction(&funding, 1).unwrap();
}

/// Scenario 3 / P8: a two-block reorganization, then its inverse.
#[test]
fn test_reorganize_two_blocks() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();
    let dispatcher = Dispatcher::new(4).unwrap();

    let funding = coinbase(1, 70_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);
    let shared = spend_transaction(outpoint(&funding, 0), 40, 1);
    let block_two = next_block(block_one.hash(), 2, vec![coinbase(2, 1_000), shared.clone()]);
    let block_three = next_block(block_two.hash(), 3, vec![coinbase(3, 1_000)]);

    store.push_block(&block_one, 1).unwrap();
    store.push_block(&block_two, 2).unwrap();
    store.push_block(&block_three, 3).unwrap();

    // The incoming branch re-includes `shared` but not the coinbases.
    let block_two_prime = next_block(block_one.hash(), 102, vec![coinbase(12, 1_000), shared.clone()]);
    let block_three_prime = next_block(block_two_prime.hash(), 103, vec![coinbase(13, 1_000)]);

    let fork_point = ForkPoint { hash: block_one.hash(), height: 1 };
    let incoming = vec![block_two_prime.clone(), block_three_prime.clone()];
    let mut outgoing = Vec::new();
    store.reorganize_blocks(&fork_point, &incoming, &mut outgoing, &dispatcher).unwrap();

    // Outgoing is the replaced branch, oldest first; the new top is 3'.
    assert_eq!(outgoing, vec![block_two.clone(), block_three.clone()]);
    assert_eq!(store.blocks().top(ChainIndex::Block), Some(3));
    assert_eq!(
        store.blocks().get(3, ChainIndex::Block).unwrap().unwrap().hash(),
        block_three_prime.hash()
    );

    // Transactions only on the outgoing branch are pooled; the shared
    // transaction is confirmed on the new branch.
    let old_coinbase = store.transactions().get(&block_two.transactions[0].hash()).unwrap().unwrap();
    assert_eq!(old_coinbase.state(), TransactionState::Pooled);
    let shared_result = store.transactions().get(&shared.hash()).unwrap().unwrap();
    assert_eq!(shared_result.state(), TransactionState::Confirmed);
    assert_eq!(shared_result.height(), 2);

    // P8: the inverse reorganization restores the original branch.
    let mut undone = Vec::new();
    store
        .reorganize_blocks(&fork_point, &outgoing.clone(), &mut undone, &dispatcher)
        .unwrap();
    assert_eq!(undone, vec![block_two_prime, block_three_prime]);
    assert_eq!(
        store.blocks().get(3, ChainIndex::Block).unwrap().unwrap().hash(),
        block_three.hash()
    );
    let shared_result = store.transactions().get(&shared.hash()).unwrap().unwrap();
    assert_eq!(shared_result.state(), TransactionState::Confirmed);
}

/// Scenario 5: a large block pushed through parallel buckets reads back
/// in exact block order.
#[test]
fn test_parallel_push_preserves_order() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();
    let dispatcher = Dispatcher::new(8).unwrap();

    let transactions: Vec<_> = (0..1_000).map(|tag| coinbase(1_000 + tag, tag)).collect();
    let big_block = next_block(genesis.hash(), 7, transactions.clone());

    let fork_point = ForkPoint { hash: genesis.hash(), height: 0 };
    let mut outgoing = Vec::new();
    store
        .reorganize_blocks(&fork_point, &[big_block.clone()], &mut outgoing, &dispatcher)
        .unwrap();
    assert!(outgoing.is_empty());

    let result = store.blocks().get(1, ChainIndex::Block).unwrap().unwrap();
    assert_eq!(result.transaction_count(), 1_000);

    let offsets = result.transaction_offsets().unwrap();
    assert_eq!(offsets.len(), 1_000);
    for (position, (offset, transaction)) in offsets.iter().zip(&transactions).enumerate() {
        let stored = store.transactions().get_at(*offset).unwrap();
        assert_eq!(stored.hash(), transaction.hash(), "position {position}");
        assert_eq!(stored.position(), position as u16);
        assert_eq!(stored.state(), TransactionState::Confirmed);
    }
}

/// Header chain: push, pop and sequential reorganization.
#[test]
fn test_header_chain_operations() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    let block_one = next_block(genesis.hash(), 1, vec![coinbase(1, 1_000)]);
    let block_two = next_block(block_one.hash(), 2, vec![coinbase(2, 1_000)]);
    store.push_header(&block_one.header, 1).unwrap();
    store.push_header(&block_two.header, 2).unwrap();
    assert_eq!(store.blocks().top(ChainIndex::Header), Some(2));

    let popped = store.pop_header(2).unwrap();
    assert_eq!(popped, block_two.header);
    assert_eq!(store.blocks().top(ChainIndex::Header), Some(1));

    // Reorganize the header chain above genesis.
    let replacement = next_block(genesis.hash(), 9, vec![coinbase(9, 1_000)]);
    let fork_point = ForkPoint { hash: genesis.hash(), height: 0 };
    let mut outgoing = Vec::new();
    store
        .reorganize_headers(&fork_point, &[replacement.header], &mut outgoing)
        .unwrap();
    assert_eq!(outgoing, vec![block_one.header]);
    assert_eq!(
        store.blocks().get(1, ChainIndex::Header).unwrap().unwrap().hash(),
        replacement.hash()
    );
}

/// Popping a height that is not the top fails, including on an empty
/// directory's genesis-only chain.
#[test]
fn test_pop_verifies_top() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    assert!(matches!(store.pop_block(5), Err(Error::BlockInvalidHeight { height: 5 })));
}

/// P3: concurrent confirm and get never yields a torn triple.
#[test]
fn test_atomic_triple_under_concurrency() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Arc::new(Coordinator::create(settings(dir.path()), &genesis).unwrap());

    let tx = coinbase(77, 1_000);
    store.push_transaction(&tx, 1).unwrap();
    let hash = tx.hash();
    let offset = store.transactions().find(&hash).unwrap().unwrap();

    // Two alternating triples; readers must see one or the other whole.
    let alternatives = [
        (100u32, 3u16, TransactionState::Confirmed),
        (200u32, 7u16, TransactionState::Indexed),
    ];

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for round in 0..500 {
                let (height, position, state) = alternatives[round % 2];
                store.transactions().confirm(offset, height, position, state).unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..500 {
                let result = store.transactions().get(&hash).unwrap().unwrap();
                let triple = (result.height(), result.position(), result.state());
                let initial = (1u32, UNCONFIRMED, TransactionState::Pooled);
                assert!(
                    triple == initial || alternatives.contains(&triple),
                    "torn triple {triple:?}"
                );
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}

/// Address, spends and stealth indexes are maintained on push.
#[test]
fn test_indexes_populated_on_push() {
    let dir = tempdir().unwrap();
    let genesis = Block::genesis();
    let store = Coordinator::create(settings(dir.path()), &genesis).unwrap();

    let funding = coinbase(1, 30_000);
    let block_one = next_block(genesis.hash(), 1, vec![funding.clone()]);
    store.push_block(&block_one, 1).unwrap();

    // A spender whose input script carries an address, plus a stealth
    // pair: OP_RETURN ephemeral script followed by a payment output.
    let ephemeral = script::stealth_ephemeral([0x44; 32]);
    let mut spender = spend_transaction(outpoint(&funding, 0), 50, 1);
    spender.inputs[0].script = script::pay_to_short_hash([0x66; 20]);
    spender.outputs.insert(0, chaindb_types::TxOut { value: 0, script: ephemeral.clone() });
    let block_two = next_block(block_one.hash(), 2, vec![coinbase(2, 1_000), spender.clone()]);
    store.push_block(&block_two, 2).unwrap();

    // Spends: the funding outpoint maps to the spending inpoint.
    let inpoint = store.spends().unwrap().get(&outpoint(&funding, 0)).unwrap().unwrap();
    assert_eq!(inpoint, Point::new(spender.hash(), 0));

    // History: the funding address received at 1 and spent at 2.
    let rows = store.history().unwrap().get(&[1; 20], 0, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].height, 1);
    assert_eq!(rows[0].kind, PointKind::Output);
    let input_rows = store.history().unwrap().get(&[0x66; 20], 0, 0).unwrap();
    assert_eq!(input_rows.len(), 1);
    assert_eq!(input_rows[0].kind, PointKind::Input);
    assert_eq!(input_rows[0].data, outpoint(&funding, 0).checksum());

    // Stealth: the ephemeral/payment pair produced one row.
    let prefix = script::stealth_prefix(&ephemeral).unwrap();
    let rows = store
        .stealth()
        .unwrap()
        .get(chaindb::PrefixFilter { bits: 32, prefix }, 0)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ephemeral_key, [0x44; 32]);
    assert_eq!(rows[0].address, [50; 20]);
    assert_eq!(rows[0].transaction_hash, spender.hash());

    // Pop unwinds spends and history; stealth rows remain (no inverse).
    store.pop_block(2).unwrap();
    assert!(store.spends().unwrap().get(&outpoint(&funding, 0)).unwrap().is_none());
    assert!(store.history().unwrap().get(&[0x66; 20], 0, 0).unwrap().is_empty());
    assert_eq!(
        store.stealth().unwrap().get(chaindb::PrefixFilter { bits: 32, prefix }, 0).unwrap().len(),
        1
    );
}
