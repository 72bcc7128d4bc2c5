//! Shared helpers for plcflow integration tests

#![allow(dead_code)]

use plcflow::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Route library logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Token that keeps a hung test from blocking forever.
pub fn token() -> CancellationToken {
    CancellationToken::with_timeout(Duration::from_secs(10))
}

/// Manager with its own started fixed pool, isolated from the shared one.
pub fn manager_with_pool(concurrent_requests: usize, workers: usize) -> TransactionManager {
    let pool = WorkerPool::fixed(workers, 64);
    pool.start();
    TransactionManager::builder()
        .concurrent_requests(concurrent_requests)
        .executor(Arc::new(pool))
        .trace_transactions(true)
        .build()
}

/// Submit `work` wrapped so it ends its own transaction afterwards.
pub fn submit_ending<F>(transaction: &Transaction, work: F)
where
    F: FnOnce() + Send + 'static,
{
    let handle = transaction.clone();
    transaction
        .submit(move || {
            work();
            handle.end_request().unwrap();
        })
        .unwrap();
}
