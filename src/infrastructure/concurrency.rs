//! Concurrency management for difftrace.
//! Configures the global rayon pool and the bounded task groups the
//! pipeline and the renderer run their batches on.

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::info;

/// A unit of work submitted to a [`TaskGroup`].
pub type Task<'a, T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'a>;

/// Initialize the global rayon thread pool with controlled worker count.
/// Reserves ~50% of CPU capacity for the analyzed crate's own builds.
pub fn init_thread_pool() -> Result<()> {
    let cores = num_cpus::get();
    // Reserve 50% capacity, minimum 1 worker
    let workers = std::cmp::max(1, cores / 2);

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()?;

    info!(
        "Initialized thread pool: {} workers (system has {} cores)",
        workers, cores
    );

    Ok(())
}

/// A bounded worker pool with barrier semantics: a batch returns only once
/// every task in it has finished.
pub struct TaskGroup {
    pool: rayon::ThreadPool,
    width: usize,
}

impl TaskGroup {
    pub fn new(width: usize) -> Result<Self> {
        let width = width.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|i| format!("difftrace-task-{}", i))
            .build()
            .context("Failed to build task pool")?;
        Ok(Self { pool, width })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run every task, at most `width` at a time. Results come back in
    /// submission order; if any task failed, the first error (in submission
    /// order) is returned instead. A failing task does not cancel its
    /// siblings.
    pub fn run_batch<'a, T, E>(&self, tasks: Vec<Task<'a, T, E>>) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
    {
        let results: Vec<Result<T, E>> = self
            .pool
            .install(|| tasks.into_par_iter().map(|task| task()).collect());
        results.into_iter().collect()
    }
}
