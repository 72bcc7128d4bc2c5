//! # plcflow
//!
//! Request admission and execution core shared by PLC protocol drivers.
//!
//! A driver talks to a field device through a connection that tolerates only
//! a few outstanding requests. plcflow keeps the driver inside that limit and
//! runs its request operations on a bounded pool of worker threads.
//!
//! ## Quick Start
//!
//! ```
//! use plcflow::prelude::*;
//!
//! let manager = TransactionManager::new(2);
//!
//! let transaction = manager.start_transaction();
//! let handle = transaction.clone();
//! transaction.submit(move || {
//!     // write the request, read the response ...
//!     handle.end_request().unwrap();
//! })?;
//!
//! transaction.await_completion(&CancellationToken::new())?;
//! # Ok::<(), plcflow::Error>(())
//! ```
//!
//! ## Building Blocks
//!
//! - [`TransactionManager`] - FIFO admission with a concurrency cap
//! - [`Transaction`] - one request under admission control
//! - [`WorkerPool`] - fixed or elastic bounded-queue executor
//! - [`CompletionFuture`] - awaitable, cancellable outcome of a work item
//! - [`SchedulerConfig`] - TOML and connection-option configuration

#![warn(missing_docs)]

pub mod config;
pub mod prelude;

pub use config::{ExecutorConfig, ExecutorKind, SchedulerConfig};

pub use plcflow_core::{CancellationToken, Error, Result, TransactionId, WorkItemId};
pub use plcflow_pool::{
    CompletionFuture, ElasticSettings, Executor, Operation, WorkItem, Worker, WorkerPool,
    WorkerPoolBuilder,
};
pub use plcflow_transactions::{
    close_shared_executor, shared_executor, Transaction, TransactionManager,
    TransactionManagerBuilder, TransactionStatus,
};
