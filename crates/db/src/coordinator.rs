//! The database coordinator: one writer, many readers.
//!
//! Owns the five databases and sequences every top-level write under the
//! write mutex and the flush-lock protocol:
//!
//! 1. take `write_mutex`;
//! 2. preflight (height continuity, parent hash, duplicate checks) —
//!    rejections here leave the store untouched;
//! 3. `begin_write` (flush-lock sentinel appears on disk);
//! 4. sub-database writes, committed in the fixed order
//!    spends → history → stealth → transactions → blocks;
//! 5. `end_write` — only on success. Any failure leaves the sentinel in
//!    place, and subsequent opens refuse the store until an operator
//!    intervenes.
//!
//! Block reorganization pops the outgoing branch a block at a time, then
//! pushes the incoming branch; within each incoming block the per-
//! transaction work fans out over dispatcher buckets (bucket `b` of `B`
//! takes positions `b, b+B, b+2B, …`) and joins before the block record is
//! stored. Blocks remain strictly sequential. Header reorganization has
//! the same shape without the fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use chaindb_store::FileOffset;
use chaindb_types::{script, Block, Hash256, Header, Point, Settings, Transaction, NULL_HASH};

use crate::block::{BlockDatabase, ChainIndex};
use crate::dispatch::Dispatcher;
use crate::error::{operation_failed, Error, Result};
use crate::history::{HistoryDatabase, PaymentRow, PointKind};
use crate::spend::SpendDatabase;
use crate::stealth::{StealthDatabase, StealthRow};
use crate::store::{self, Store};
use crate::transaction::{TransactionDatabase, TransactionState, UNCONFIRMED, UNRESTRICTED};

/// The common ancestor of two branches during reorganization.
#[derive(Debug, Clone, Copy)]
pub struct ForkPoint {
    pub hash: Hash256,
    pub height: u32,
}

/// A transaction rehydrated from the store along with its record offset.
type StoredTransaction = (FileOffset, Transaction);

/// The chain store coordinator.
pub struct Coordinator {
    settings: Settings,
    store: Store,
    blocks: BlockDatabase,
    transactions: TransactionDatabase,
    spends: Option<SpendDatabase>,
    history: Option<HistoryDatabase>,
    stealth: Option<StealthDatabase>,
    /// Serializes every top-level write.
    write_mutex: Mutex<()>,
    closed: AtomicBool,
}

impl Coordinator {
    /// Acquire the directory and map every database file.
    fn construct(settings: Settings) -> Result<Self> {
        settings
            .validate()
            .map_err(|error| operation_failed(format!("settings: {error}")))?;

        let store = Store::new(&settings.directory);
        store.open()?;

        debug!(
            block = settings.block_table_buckets,
            transaction = settings.transaction_table_buckets,
            spend = settings.spend_table_buckets,
            history = settings.history_table_buckets,
            "table buckets"
        );

        let rate = settings.file_growth_rate;
        let blocks = BlockDatabase::new(
            store.path(store::BLOCK_TABLE),
            store.path(store::HEADER_INDEX),
            store.path(store::BLOCK_INDEX),
            store.path(store::TRANSACTION_INDEX),
            settings.block_table_buckets,
            rate,
        )?;
        let transactions = TransactionDatabase::new(
            store.path(store::TRANSACTION_TABLE),
            settings.transaction_table_buckets,
            rate,
            settings.cache_capacity,
        )?;

        let (spends, history, stealth) = if settings.index_addresses {
            (
                Some(SpendDatabase::new(
                    store.path(store::SPEND_TABLE),
                    settings.spend_table_buckets,
                    rate,
                )?),
                Some(HistoryDatabase::new(
                    store.path(store::HISTORY_TABLE),
                    store.path(store::HISTORY_ROWS),
                    settings.history_table_buckets,
                    rate,
                )?),
                Some(StealthDatabase::new(store.path(store::STEALTH_ROWS), rate)?),
            )
        } else {
            (None, None, None)
        };

        Ok(Self {
            settings,
            store,
            blocks,
            transactions,
            spends,
            history,
            stealth,
            write_mutex: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a new store rooted at the settings directory and seed it
    /// with the genesis block (header chain and block chain both reach
    /// height 0).
    pub fn create(settings: Settings, genesis: &Block) -> Result<Self> {
        let coordinator = Self::construct(settings)?;

        coordinator.blocks.create()?;
        coordinator.transactions.create()?;
        if let Some(spends) = &coordinator.spends {
            spends.create()?;
        }
        if let Some(history) = &coordinator.history {
            history.create()?;
        }
        if let Some(stealth) = &coordinator.stealth {
            stealth.create()?;
        }

        coordinator.push_header(&genesis.header, 0)?;
        coordinator.push_block(genesis, 0)?;

        info!(directory = %coordinator.settings.directory.display(), "store created");
        Ok(coordinator)
    }

    /// Open an existing store.
    pub fn open(settings: Settings) -> Result<Self> {
        let coordinator = Self::construct(settings)?;

        coordinator.blocks.open()?;
        coordinator.transactions.open()?;
        if let Some(spends) = &coordinator.spends {
            spends.open()?;
        }
        if let Some(history) = &coordinator.history {
            history.open()?;
        }
        if let Some(stealth) = &coordinator.stealth {
            stealth.open()?;
        }

        info!(directory = %coordinator.settings.directory.display(), "store opened");
        Ok(coordinator)
    }

    /// Close the store. Idempotent; also invoked on drop.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.blocks.close()?;
        self.transactions.close()?;
        if let Some(spends) = &self.spends {
            spends.close()?;
        }
        if let Some(history) = &self.history {
            history.close()?;
        }
        if let Some(stealth) = &self.stealth {
            stealth.close()?;
        }

        self.store.close()?;
        info!(directory = %self.settings.directory.display(), "store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(operation_failed("store is closed"));
        }
        Ok(())
    }

    // Reader interfaces.

    pub fn blocks(&self) -> &BlockDatabase {
        &self.blocks
    }

    pub fn transactions(&self) -> &TransactionDatabase {
        &self.transactions
    }

    /// `None` unless address indexing is enabled.
    pub fn spends(&self) -> Option<&SpendDatabase> {
        self.spends.as_ref()
    }

    /// `None` unless address indexing is enabled.
    pub fn history(&self) -> Option<&HistoryDatabase> {
        self.history.as_ref()
    }

    /// `None` unless address indexing is enabled.
    pub fn stealth(&self) -> Option<&StealthDatabase> {
        self.stealth.as_ref()
    }

    // Synchronous writers.

    /// Pool a validated, unconfirmed transaction.
    pub fn push_transaction(&self, transaction: &Transaction, forks: u32) -> Result<()> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();

        // Duplicate hashes are tolerable only once fully spent (BIP30).
        if let Some(existing) = self.transactions.get(&transaction.hash())? {
            if !existing.is_spent(UNRESTRICTED)? {
                return Err(Error::UnspentDuplicate);
            }
        }

        self.store.begin_write()?;
        self.transactions.store(transaction, forks, UNCONFIRMED, TransactionState::Pooled)?;
        self.transactions.commit()?;
        self.finish_write()
    }

    /// Append the next header to the header chain.
    pub fn push_header(&self, header: &Header, height: u32) -> Result<()> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();
        self.verify_push_header(header, height)?;

        self.store.begin_write()?;
        self.blocks.store_header(header, height)?;
        self.blocks.commit()?;
        self.finish_write()
    }

    /// Append the next block to the block chain, confirming its
    /// transactions sequentially.
    pub fn push_block(&self, block: &Block, height: u32) -> Result<()> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();
        self.verify_push_block(block, height)?;

        self.store.begin_write()?;
        let offsets = self.push_block_transactions(block, height, None)?;
        self.blocks.store_block(&block.header, height, &offsets)?;
        self.commit()?;
        self.finish_write()
    }

    /// Remove the top block of the block chain, returning it with its
    /// transactions demoted to the pool.
    pub fn pop_block(&self, height: u32) -> Result<Block> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();

        self.verify_top(height, ChainIndex::Block)?;
        let (header, entries) = self.read_block(height, ChainIndex::Block)?;

        self.store.begin_write()?;
        self.pop_transactions(&entries)?;
        self.blocks.unconfirm(height, ChainIndex::Block)?;
        self.commit()?;
        self.finish_write()?;

        Ok(Block::new(header, entries.into_iter().map(|(_, transaction)| transaction).collect()))
    }

    /// Remove the top header of the header chain.
    pub fn pop_header(&self, height: u32) -> Result<Header> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();

        self.verify_top(height, ChainIndex::Header)?;
        let (header, entries) = self.read_block(height, ChainIndex::Header)?;

        self.store.begin_write()?;
        self.pop_transactions(&entries)?;
        self.blocks.unconfirm(height, ChainIndex::Header)?;
        self.commit()?;
        self.finish_write()?;

        Ok(header)
    }

    // Reorganization.

    /// Replace the block branch above `fork_point` with `incoming`.
    ///
    /// `outgoing` receives the removed branch oldest-first. Each incoming
    /// block's transactions are pushed across
    /// `min(dispatcher.size(), tx_count)` buckets; the join gate closes
    /// before the block record is stored.
    pub fn reorganize_blocks(
        &self,
        fork_point: &ForkPoint,
        incoming: &[Block],
        outgoing: &mut Vec<Block>,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        self.ensure_open()?;
        if u32::try_from(incoming.len()).is_err()
            || fork_point.height > u32::MAX - incoming.len() as u32
        {
            return Err(operation_failed("reorganization exceeds height range"));
        }

        let _writer = self.write_mutex.lock();
        self.verify_fork_point(fork_point, ChainIndex::Block)?;

        self.store.begin_write()?;
        self.pop_above(fork_point, outgoing)?;
        self.commit()?;

        for (index, block) in incoming.iter().enumerate() {
            let height = fork_point.height + 1 + index as u32;
            self.verify_push_block(block, height)?;

            let offsets = self.push_block_transactions(block, height, Some(dispatcher))?;
            self.blocks.store_block(&block.header, height, &offsets)?;
            self.commit()?;
        }

        self.finish_write()
    }

    /// Replace the header branch above `fork_point` with `incoming`.
    /// Same shape as the block reorganization, sequential throughout.
    pub fn reorganize_headers(
        &self,
        fork_point: &ForkPoint,
        incoming: &[Header],
        outgoing: &mut Vec<Header>,
    ) -> Result<()> {
        self.ensure_open()?;
        let _writer = self.write_mutex.lock();
        self.verify_fork_point(fork_point, ChainIndex::Header)?;

        self.store.begin_write()?;

        let top = self
            .blocks
            .top(ChainIndex::Header)
            .ok_or(Error::BlockInvalidHeight { height: fork_point.height })?;
        outgoing.clear();
        for height in (fork_point.height + 1..=top).rev() {
            let (header, entries) = self.read_block(height, ChainIndex::Header)?;
            self.pop_transactions(&entries)?;
            self.blocks.unconfirm(height, ChainIndex::Header)?;
            outgoing.insert(0, header);
        }
        self.commit()?;

        for (index, header) in incoming.iter().enumerate() {
            let height = fork_point.height + 1 + index as u32;
            self.verify_push_header(header, height)?;
            self.blocks.store_header(header, height)?;
            self.blocks.commit()?;
        }

        self.finish_write()
    }

    // Utilities.

    fn verify_top(&self, height: u32, chain: ChainIndex) -> Result<()> {
        // An empty chain is treated as a height mismatch.
        if self.blocks.top(chain) != Some(height) {
            return Err(Error::BlockInvalidHeight { height });
        }
        Ok(())
    }

    fn previous_hash(&self, height: u32, chain: ChainIndex) -> Result<Hash256> {
        if height == 0 {
            return Ok(NULL_HASH);
        }
        let result = self
            .blocks
            .get(height - 1, chain)?
            .ok_or_else(|| operation_failed("parent below the chain top is missing"))?;
        Ok(result.hash())
    }

    fn verify_push_header(&self, header: &Header, height: u32) -> Result<()> {
        let next = self.blocks.top(ChainIndex::Header).map_or(0, |top| top + 1);
        if next != height {
            return Err(Error::BlockInvalidHeight { height });
        }
        if self.previous_hash(height, ChainIndex::Header)? != header.previous_block_hash {
            return Err(Error::BlockMissingParent { height });
        }
        Ok(())
    }

    fn verify_push_block(&self, block: &Block, height: u32) -> Result<()> {
        if block.transactions.is_empty() {
            return Err(Error::EmptyBlock);
        }
        let next = self.blocks.top(ChainIndex::Block).map_or(0, |top| top + 1);
        if next != height {
            return Err(Error::BlockInvalidHeight { height });
        }
        if self.previous_hash(height, ChainIndex::Block)? != block.header.previous_block_hash {
            return Err(Error::BlockMissingParent { height });
        }
        Ok(())
    }

    fn verify_fork_point(&self, fork_point: &ForkPoint, chain: ChainIndex) -> Result<()> {
        let result = self
            .blocks
            .get_by_hash(&fork_point.hash)?
            .ok_or_else(|| operation_failed("fork point not stored"))?;

        let member = match chain {
            ChainIndex::Block => result.is_confirmed(),
            ChainIndex::Header => result.is_confirmed() || result.is_indexed(),
        };
        if result.height() != fork_point.height || !member {
            return Err(operation_failed("fork point is not on the chain"));
        }
        Ok(())
    }

    /// Rehydrate the block at `height` from stored transaction offsets.
    fn read_block(
        &self,
        height: u32,
        chain: ChainIndex,
    ) -> Result<(Header, Vec<StoredTransaction>)> {
        let (header, offsets) = {
            let result = self
                .blocks
                .get(height, chain)?
                .ok_or_else(|| operation_failed("chain top is not stored"))?;
            (result.header()?, result.transaction_offsets()?)
        };

        let mut entries = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let result = self.transactions.get_at(offset)?;
            entries.push((offset, result.transaction()?));
        }
        Ok((header, entries))
    }

    /// Pop every block above the fork point into `outgoing`, oldest
    /// first.
    fn pop_above(&self, fork_point: &ForkPoint, outgoing: &mut Vec<Block>) -> Result<()> {
        let top = self
            .blocks
            .top(ChainIndex::Block)
            .ok_or(Error::BlockInvalidHeight { height: fork_point.height })?;

        outgoing.clear();
        for height in (fork_point.height + 1..=top).rev() {
            let (header, entries) = self.read_block(height, ChainIndex::Block)?;
            self.pop_transactions(&entries)?;
            self.blocks.unconfirm(height, ChainIndex::Block)?;
            outgoing.insert(
                0,
                Block::new(header, entries.into_iter().map(|(_, transaction)| transaction).collect()),
            );
        }
        Ok(())
    }

    /// Store a block's transactions as confirmed, returning their slab
    /// offsets in block order. With a dispatcher, positions fan out over
    /// buckets; otherwise the push is sequential.
    fn push_block_transactions(
        &self,
        block: &Block,
        height: u32,
        dispatcher: Option<&Dispatcher>,
    ) -> Result<Vec<FileOffset>> {
        let count = block.transactions.len();
        let offsets: Vec<AtomicU64> = (0..count).map(|_| AtomicU64::new(0)).collect();

        match dispatcher {
            Some(dispatcher) => {
                let buckets = dispatcher.size().min(count).max(1);
                dispatcher.run(buckets, |bucket| {
                    self.push_transactions(block, height, &offsets, bucket, buckets)
                })?;
            }
            None => self.push_transactions(block, height, &offsets, 0, 1)?,
        }

        Ok(offsets.iter().map(|offset| offset.load(Ordering::Relaxed)).collect())
    }

    /// Push the transactions of one bucket: positions `bucket`,
    /// `bucket + buckets`, … of the block, as confirmed at `height`.
    fn push_transactions(
        &self,
        block: &Block,
        height: u32,
        offsets: &[AtomicU64],
        bucket: usize,
        buckets: usize,
    ) -> Result<()> {
        debug_assert!(bucket < buckets);
        let transactions = &block.transactions;

        let mut position = bucket;
        while position < transactions.len() {
            let transaction = &transactions[position];
            let offset = self.transactions.store(
                transaction,
                height,
                position as u16,
                TransactionState::Confirmed,
            )?;
            offsets[position].store(offset, Ordering::Relaxed);

            if self.settings.index_addresses {
                self.push_inputs(transaction, height)?;
                self.push_outputs(transaction, height)?;
                self.push_stealth(transaction, height)?;
            }

            position += buckets;
        }
        Ok(())
    }

    fn push_inputs(&self, transaction: &Transaction, height: u32) -> Result<()> {
        if transaction.is_coinbase() {
            return Ok(());
        }
        let (Some(spends), Some(history)) = (&self.spends, &self.history) else {
            return Ok(());
        };

        let hash = transaction.hash();
        for (index, input) in transaction.inputs.iter().enumerate() {
            let inpoint = Point::new(hash, index as u32);
            let prevout = input.previous_output;
            spends.store(&prevout, &inpoint)?;

            if let Some(address) = script::payment_hash(&input.script) {
                history.store(
                    &address,
                    &PaymentRow {
                        height,
                        kind: PointKind::Input,
                        point: inpoint,
                        data: prevout.checksum(),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn push_outputs(&self, transaction: &Transaction, height: u32) -> Result<()> {
        let Some(history) = &self.history else { return Ok(()) };

        let hash = transaction.hash();
        for (index, output) in transaction.outputs.iter().enumerate() {
            if let Some(address) = script::payment_hash(&output.script) {
                history.store(
                    &address,
                    &PaymentRow {
                        height,
                        kind: PointKind::Output,
                        point: Point::new(hash, index as u32),
                        data: output.value,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn push_stealth(&self, transaction: &Transaction, height: u32) -> Result<()> {
        let Some(stealth) = &self.stealth else { return Ok(()) };
        let outputs = &transaction.outputs;
        if outputs.is_empty() {
            return Ok(());
        }

        let hash = transaction.hash();
        // Stealth outputs are paired by convention: the ephemeral-key
        // script immediately precedes the payment output.
        for index in 0..outputs.len() - 1 {
            let ephemeral_script = &outputs[index].script;
            let payment = &outputs[index + 1];

            let Some(address) = script::payment_hash(&payment.script) else { continue };
            let Some(ephemeral_key) = script::ephemeral_key(ephemeral_script) else { continue };
            let Some(prefix) = script::stealth_prefix(ephemeral_script) else { continue };

            stealth.store(&StealthRow {
                prefix,
                height,
                ephemeral_key,
                address,
                transaction_hash: hash,
            })?;
        }
        Ok(())
    }

    /// Demote popped transactions, newest position first, unwinding the
    /// indexes as the exact inverse of the push order.
    fn pop_transactions(&self, entries: &[StoredTransaction]) -> Result<()> {
        for (offset, transaction) in entries.iter().rev() {
            self.transactions.pool(*offset)?;

            if self.settings.index_addresses {
                // Stealth has no inverse; stale rows are height-filtered.
                self.pop_outputs(transaction)?;
                self.pop_inputs(transaction)?;
            }
        }
        Ok(())
    }

    fn pop_inputs(&self, transaction: &Transaction) -> Result<()> {
        if transaction.is_coinbase() {
            return Ok(());
        }
        let (Some(spends), Some(history)) = (&self.spends, &self.history) else {
            return Ok(());
        };

        for input in transaction.inputs.iter().rev() {
            if !spends.unlink(&input.previous_output)? {
                return Err(operation_failed("spends entry missing during pop"));
            }
            if let Some(address) = script::payment_hash(&input.script) {
                if !history.unlink_last_row(&address)? {
                    return Err(operation_failed("history row missing during pop"));
                }
            }
        }
        Ok(())
    }

    fn pop_outputs(&self, transaction: &Transaction) -> Result<()> {
        let Some(history) = &self.history else { return Ok(()) };

        for output in transaction.outputs.iter().rev() {
            if let Some(address) = script::payment_hash(&output.script) {
                if !history.unlink_last_row(&address)? {
                    return Err(operation_failed("history row missing during pop"));
                }
            }
        }
        Ok(())
    }

    /// Commit every touched database, fixed order.
    fn commit(&self) -> Result<()> {
        if let Some(spends) = &self.spends {
            spends.commit()?;
        }
        if let Some(history) = &self.history {
            history.commit()?;
        }
        if let Some(stealth) = &self.stealth {
            stealth.commit()?;
        }
        self.transactions.commit()?;
        self.blocks.commit()
    }

    fn flush_all(&self) -> Result<()> {
        self.blocks.flush()?;
        self.transactions.flush()?;
        if let Some(spends) = &self.spends {
            spends.flush()?;
        }
        if let Some(history) = &self.history {
            history.flush()?;
        }
        if let Some(stealth) = &self.stealth {
            stealth.flush()?;
        }
        Ok(())
    }

    /// Complete a successful write: optional fsync, then drop the
    /// flush-lock sentinel.
    fn finish_write(&self) -> Result<()> {
        if self.settings.flush_writes {
            self.flush_all()?;
            debug!("write flushed to disk");
        }
        self.store.end_write()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
