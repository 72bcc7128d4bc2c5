//! Admission control for plcflow
//!
//! This crate bounds how many requests a driver has in flight:
//! - [`TransactionManager`]: FIFO backlog plus a capped running set
//! - [`Transaction`]: caller-side handle of one request
//! - [`shared_executor`]: process-wide default executor
//!
//! # Example
//!
//! ```
//! use plcflow_core::CancellationToken;
//! use plcflow_transactions::{TransactionManager, TransactionStatus};
//!
//! let manager = TransactionManager::new(1);
//! let transaction = manager.start_transaction();
//! let handle = transaction.clone();
//! transaction
//!     .submit(move || {
//!         handle.end_request().unwrap();
//!     })
//!     .unwrap();
//! transaction.await_completion(&CancellationToken::new()).unwrap();
//! assert_eq!(transaction.status(), TransactionStatus::Completed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod shared;
pub mod transaction;

pub use manager::{TransactionManager, TransactionManagerBuilder, DEFAULT_CONCURRENT_REQUESTS};
pub use shared::{close_shared_executor, shared_executor};
pub use transaction::{Transaction, TransactionStatus};
