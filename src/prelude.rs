//! Convenient imports for plcflow.
//!
//! ```
//! use plcflow::prelude::*;
//!
//! let manager = TransactionManager::new(1);
//! assert_eq!(manager.number_of_concurrent_requests(), 1);
//! ```

// Admission
pub use crate::{Transaction, TransactionManager, TransactionStatus};

// Execution
pub use crate::{CompletionFuture, ElasticSettings, Executor, WorkerPool};

// Cancellation and errors
pub use crate::{CancellationToken, Error, Result};

// Configuration
pub use crate::SchedulerConfig;
