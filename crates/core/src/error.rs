//! Error types shared by every plcflow crate
//!
//! Errors are plain values: rejected submissions, cancellations and
//! double-completions are all reported through [`Error`], never by panicking.
//!
//! `Error` is `Clone` because a resolved completion future hands the same
//! outcome to every awaiter. Failure causes supplied by protocol drivers are
//! kept behind an `Arc` so they can be shared the same way.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Transaction identifiers are allocated by a manager, monotonically increasing.
pub type TransactionId = u64;

/// Work item identifiers are supplied by the submitter for tracing.
pub type WorkItemId = u64;

/// All plcflow errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A completion future was cancelled without an explicit cause
    #[error("canceled")]
    Cancelled,

    /// The caller's cancellation token was cancelled
    #[error("context canceled")]
    ContextCancelled,

    /// The caller's cancellation token passed its deadline
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Work was submitted to an executor that is shut down
    #[error("executor is shut down")]
    ExecutorShutDown,

    /// A transaction was started or submitted on a closed manager
    #[error("transaction manager is shut down")]
    ManagerShutDown,

    /// EndRequest/FailRequest/Submit on a transaction that already finished
    #[error("transaction {transaction_id} already completed")]
    AlreadyCompleted {
        /// Offending transaction
        transaction_id: TransactionId,
    },

    /// The manager does not track this transaction
    #[error("unknown transaction {transaction_id}")]
    UnknownTransaction {
        /// Offending transaction
        transaction_id: TransactionId,
    },

    /// A transaction was admitted without an operation attached
    #[error("transaction {transaction_id} has no operation")]
    NoOperation {
        /// Offending transaction
        transaction_id: TransactionId,
    },

    /// The operation of a work item panicked
    #[error("work item {work_item_id} panicked: {message}")]
    Panicked {
        /// Work item whose operation panicked
        work_item_id: WorkItemId,
        /// Panic payload rendered as text
        message: String,
    },

    /// Configuration could not be parsed or is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure cause supplied by the caller
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

/// Result type for plcflow operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a caller-supplied failure cause.
    pub fn failed<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(cause))
    }

    /// Build a failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Failed(Arc::new(Message(message.into())))
    }

    /// Check if this error stems from any kind of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::ContextCancelled | Error::DeadlineExceeded
        )
    }

    /// Check if this error was caused by a shut down executor or manager.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::ExecutorShutDown | Error::ManagerShutDown)
    }
}

/// Plain-text failure cause behind [`Error::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}
