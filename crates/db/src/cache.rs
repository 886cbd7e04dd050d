//! Bounded cache of unspent, confirmed outputs.
//!
//! The fast path of prevout population during script validation. Entries
//! are admitted only when their transaction confirms (the cache must never
//! contradict the store for any queried fork height), and evicted the
//! moment the output is spent or its transaction leaves the block chain.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use chaindb_types::{Hash256, Point, Transaction, TxOut};

/// A cached unspent output with the confirmation context prevout
/// population needs.
#[derive(Debug, Clone)]
pub struct CachedOutput {
    /// The output itself.
    pub output: TxOut,
    /// Height of the confirmed transaction carrying it.
    pub height: u32,
    /// Whether the carrying transaction is a coinbase.
    pub coinbase: bool,
}

/// LRU map of outpoints to unspent confirmed outputs.
///
/// A capacity of zero disables caching entirely.
pub struct UnspentOutputs {
    entries: Option<Mutex<LruCache<Point, CachedOutput>>>,
}

impl UnspentOutputs {
    pub fn new(capacity: usize) -> Self {
        let entries =
            NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self { entries }
    }

    /// Admit every output of a transaction confirmed at `height`.
    ///
    /// The genesis coinbase is unspendable by consensus and is never
    /// admitted.
    pub fn add(&self, hash: Hash256, transaction: &Transaction, height: u32) {
        let Some(entries) = &self.entries else { return };
        if height == 0 {
            return;
        }

        let coinbase = transaction.is_coinbase();
        let mut entries = entries.lock();
        for (index, output) in transaction.outputs.iter().enumerate() {
            entries.put(
                Point::new(hash, index as u32),
                CachedOutput { output: output.clone(), height, coinbase },
            );
        }
    }

    /// Look up an outpoint, honoring the caller's fork height.
    ///
    /// A hit is only valid when the carrying transaction is confirmed at or
    /// below `fork_height`; deeper entries stay cached for other forks.
    pub fn populate(&self, point: &Point, fork_height: u32) -> Option<CachedOutput> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock();
        let cached = entries.get(point)?;
        (cached.height <= fork_height).then(|| cached.clone())
    }

    /// Evict an outpoint (spent, or its transaction left the chain).
    pub fn remove(&self, point: &Point) {
        if let Some(entries) = &self.entries {
            entries.lock().pop(point);
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    /// True when no outputs are cached (or caching is disabled).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
