//! Worker pools for plcflow
//!
//! This crate runs driver operations on background threads:
//! - [`CompletionFuture`]: awaitable, cancellable outcome of one work item
//! - [`Worker`]: one thread draining the pool queue
//! - [`Executor`]: the pool abstraction the transaction manager depends on
//! - [`WorkerPool`]: bounded-queue pool, fixed or elastic ([`ElasticSettings`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod elastic;
pub mod executor;
pub mod future;
pub mod work_item;
pub mod worker;

pub use elastic::ElasticSettings;
pub use executor::{Executor, WorkerPool, WorkerPoolBuilder, DEFAULT_QUEUE_DEPTH};
pub use future::CompletionFuture;
pub use work_item::{Operation, WorkItem};
pub use worker::{Worker, WorkerId};
