//! Process-wide default executor
//!
//! Every connection of every driver should draw from one bounded thread
//! budget, so managers built without an explicit executor share a single
//! fixed pool. It is created on first use, started immediately, and lives
//! until the process exits or [`close_shared_executor`] is called.
//!
//! Tests and callers needing isolation inject their own executor through
//! [`TransactionManagerBuilder::executor`](crate::TransactionManagerBuilder::executor).

use once_cell::sync::Lazy;
use plcflow_core::Result;
use plcflow_pool::{Executor, WorkerPool, DEFAULT_QUEUE_DEPTH};
use std::sync::Arc;

static SHARED_EXECUTOR: Lazy<Arc<WorkerPool>> = Lazy::new(|| {
    let pool = WorkerPool::builder().queue_depth(DEFAULT_QUEUE_DEPTH).build();
    pool.start();
    Arc::new(pool)
});

/// The shared executor: a started fixed pool with one worker per CPU.
pub fn shared_executor() -> Arc<dyn Executor> {
    SHARED_EXECUTOR.clone()
}

/// Stop the shared executor if it was ever created.
///
/// Irreversible for the rest of the process: managers using it get
/// already-failed futures afterwards.
pub fn close_shared_executor() -> Result<()> {
    match Lazy::get(&SHARED_EXECUTOR) {
        Some(pool) => pool.close(),
        None => Ok(()),
    }
}

/// Check whether `executor` is the shared instance, without creating it.
pub(crate) fn is_shared(executor: &Arc<dyn Executor>) -> bool {
    Lazy::get(&SHARED_EXECUTOR).map_or(false, |shared| {
        Arc::as_ptr(executor) as *const () == Arc::as_ptr(shared) as *const ()
    })
}
