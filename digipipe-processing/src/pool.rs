//! Worker pool used to fan out processor calls.

use digipipe_core::error::{Error, Result};
use log::error;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;

enum Mode {
    Sequential,
    Global,
    Dedicated(ThreadPool),
}

/// Runs a batch of tasks to completion, sequentially or on rayon threads.
///
/// Every task of a batch runs even if an earlier one failed; the error of
/// the lowest-indexed failing task is returned and the rest are logged, so
/// sequential and parallel runs report the same failure.
pub struct WorkerPool {
    mode: Mode,
}

impl WorkerPool {
    /// Runs every task on the calling thread, in order.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            mode: Mode::Sequential,
        }
    }

    /// Runs parallel batches on rayon's global pool.
    #[must_use]
    pub fn global() -> Self {
        Self { mode: Mode::Global }
    }

    /// Runs parallel batches on a dedicated pool of `num_threads` threads.
    ///
    /// `0` yields a sequential pool.
    ///
    /// # Errors
    /// Returns [`Error::PoolError`] if the threads cannot be spawned.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Ok(Self::sequential());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("digipipe-worker-{i}"))
            .build()
            .map_err(|e| Error::PoolError(e.to_string()))?;
        Ok(Self {
            mode: Mode::Dedicated(pool),
        })
    }

    /// Returns true if parallel batches actually run concurrently.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        !matches!(self.mode, Mode::Sequential)
    }

    /// Number of threads parallel batches may use.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        match &self.mode {
            Mode::Sequential => 1,
            Mode::Global => rayon::current_num_threads(),
            Mode::Dedicated(pool) => pool.current_num_threads(),
        }
    }

    /// Invokes `f` on every task and blocks until all have completed.
    ///
    /// With `parallel` unset the tasks run on the calling thread in slice
    /// order. With it set they may run concurrently in any order.
    ///
    /// # Errors
    /// Returns the error of the lowest-indexed failing task.
    pub fn run<T, F>(&self, tasks: &[T], parallel: bool, f: F) -> Result<()>
    where
        T: Sync,
        F: Fn(&T) -> Result<()> + Sync + Send,
    {
        let results: Vec<Result<()>> = match &self.mode {
            _ if !parallel || tasks.len() < 2 => tasks.iter().map(&f).collect(),
            Mode::Sequential => tasks.iter().map(&f).collect(),
            Mode::Global => tasks.par_iter().map(&f).collect(),
            Mode::Dedicated(pool) => pool.install(|| tasks.par_iter().map(&f).collect()),
        };
        first_error(results)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::sequential()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Sequential => "sequential",
            Mode::Global => "global",
            Mode::Dedicated(_) => "dedicated",
        };
        f.debug_struct("WorkerPool")
            .field("mode", &mode)
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            if first.is_none() {
                first = Some(e);
            } else {
                error!("additional worker failure: {e}");
            }
        }
    }
    first.map_or(Ok(()), Err)
}
