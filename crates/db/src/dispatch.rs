//! Blocking work dispatcher for parallel per-transaction writes.
//!
//! A thin wrapper over a rayon pool. `run` is the join gate: it executes
//! one task per bucket and returns only when every bucket has finished,
//! surfacing the first failure. The store has no async runtime dependency;
//! block sequencing above this is strictly serial.

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{operation_failed, Error, Result};

/// A fixed-size blocking thread pool.
pub struct Dispatcher {
    pool: ThreadPool,
}

impl Dispatcher {
    /// Build a pool of `threads` workers (0 selects the rayon default).
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("chaindb-dispatch-{index}"))
            .build()
            .map_err(|error| operation_failed(format!("dispatcher: {error}")))?;
        Ok(Self { pool })
    }

    /// The worker count, which bounds the bucket fan-out.
    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task(bucket)` for every bucket in `0..buckets` on the pool and
    /// wait for all of them.
    ///
    /// Returns the first error any bucket produced; remaining buckets still
    /// run to completion (the join gate always closes).
    pub fn run<F>(&self, buckets: usize, task: F) -> Result<()>
    where
        F: Fn(usize) -> Result<()> + Sync,
    {
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        self.pool.scope(|scope| {
            let task = &task;
            let failure = &failure;
            for bucket in 0..buckets {
                scope.spawn(move |_| {
                    if let Err(error) = task(bucket) {
                        failure.lock().get_or_insert(error);
                    }
                });
            }
        });

        match failure.into_inner() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
