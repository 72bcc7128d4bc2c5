//! Caller-side handle of one admission-controlled request
//!
//! A driver obtains a [`Transaction`] from
//! [`TransactionManager::start_transaction`](crate::TransactionManager::start_transaction),
//! attaches its operation with [`Transaction::submit`] and, from inside that
//! operation, reports the end of the request exactly once through
//! [`Transaction::end_request`] or [`Transaction::fail_request`]. Forgetting
//! to do so keeps the concurrency slot occupied forever.
//!
//! ```text
//!   Created ──submit──► Queued ──admitted──► Running ──end_request──► Completed
//!                          │                    └─────fail_request──► Failed
//!                          └── (skipped when a slot is free right away)
//! ```

use crate::manager::ManagerInner;
use parking_lot::Mutex;
use plcflow_core::{CancellationToken, Error, Result, TransactionId};
use plcflow_pool::{CompletionFuture, Operation};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Started, no operation submitted yet
    Created,
    /// Waiting in the backlog for a free slot
    Queued,
    /// Occupies a slot; its operation is queued on or running in the executor
    Running,
    /// Ended through `end_request`
    Completed,
    /// Ended through `fail_request`, or rejected by a closed manager
    Failed,
}

impl TransactionStatus {
    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Queued => "queued",
            TransactionStatus::Running => "running",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Bookkeeping shared between a transaction handle and its manager.
pub(crate) struct TransactionState {
    pub(crate) id: TransactionId,
    pub(crate) operation: Mutex<Option<Operation>>,
    pub(crate) status: Mutex<TransactionStatus>,
    pub(crate) future: Mutex<Option<CompletionFuture>>,
}

impl TransactionState {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            operation: Mutex::new(None),
            status: Mutex::new(TransactionStatus::Created),
            future: Mutex::new(None),
        }
    }

    /// State of a transaction that is dead on arrival.
    pub(crate) fn rejected(id: TransactionId, err: Error) -> Self {
        Self {
            id,
            operation: Mutex::new(None),
            status: Mutex::new(TransactionStatus::Failed),
            future: Mutex::new(Some(CompletionFuture::failed(err))),
        }
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Install the executor's future unless one is already present.
    ///
    /// A failure reported before the executor handed back its future has
    /// already installed an errored one, which stays authoritative.
    pub(crate) fn install_future(&self, future: CompletionFuture) {
        let mut slot = self.future.lock();
        if slot.is_none() {
            *slot = Some(future);
        }
    }

    /// Resolve the transaction's future with `err`, installing one if needed.
    pub(crate) fn fail_future(&self, err: Error) {
        let mut slot = self.future.lock();
        match &*slot {
            Some(future) => future.cancel(true, Some(err)),
            None => *slot = Some(CompletionFuture::failed(err)),
        }
    }

    /// Leave a resolved future for awaiters of a transaction that never ran.
    pub(crate) fn cancel_future(&self) {
        let mut slot = self.future.lock();
        match &*slot {
            Some(future) => future.cancel(false, None),
            None => {
                let future = CompletionFuture::new();
                future.cancel(false, None);
                *slot = Some(future);
            }
        }
    }
}

/// One request under admission control.
///
/// Cloning yields another handle to the same transaction, which is how an
/// operation gets hold of the transaction it has to end.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) state: Arc<TransactionState>,
    pub(crate) manager: Arc<ManagerInner>,
}

impl Transaction {
    /// Manager-assigned identifier.
    pub fn transaction_id(&self) -> TransactionId {
        self.state.id
    }

    /// Current lifecycle position.
    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    /// Check if the transaction was ended or failed.
    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// Future of the dispatched operation, once admitted.
    pub fn completion_future(&self) -> Option<CompletionFuture> {
        self.state.future.lock().clone()
    }

    /// Attach the operation and hand the transaction to admission.
    ///
    /// Submitting twice is a caller bug: the second operation is dropped with
    /// a warning. Submitting after the transaction ended returns
    /// [`Error::AlreadyCompleted`].
    pub fn submit<F>(&self, operation: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let status = self.status();
        if status.is_terminal() {
            return Err(Error::AlreadyCompleted {
                transaction_id: self.state.id,
            });
        }
        {
            let mut slot = self.state.operation.lock();
            if slot.is_some() || status != TransactionStatus::Created {
                warn!(transaction_id = self.state.id, "Operation already set");
                return Ok(());
            }
            *slot = Some(Box::new(operation));
        }
        self.manager.submit_transaction(&self.state)
    }

    /// Report that the request is done and free its slot.
    pub fn end_request(&self) -> Result<()> {
        self.manager.end_request(&self.state)
    }

    /// Report that the request failed with `err` and free its slot.
    ///
    /// Awaiters of the transaction observe `err`.
    pub fn fail_request(&self, err: Error) -> Result<()> {
        self.manager.fail_request(&self.state, err)
    }

    /// Block until the transaction was admitted, its operation resolved, and
    /// its slot is visibly free again (or `token` fires).
    ///
    /// This confirms scheduling, not protocol-level success: the driver
    /// reports its own results through its own channel.
    pub fn await_completion(&self, token: &CancellationToken) -> Result<()> {
        let future = loop {
            if let Some(future) = self.completion_future() {
                break future;
            }
            if let Some(err) = token.error() {
                return Err(err);
            }
            std::thread::sleep(token.poll_interval());
        };

        let outcome = future.await_completion(token);

        // The future may resolve a moment before the slot is released
        while self.manager.is_active(self.state.id) {
            if let Some(err) = token.error() {
                return Err(err);
            }
            std::thread::sleep(token.poll_interval());
        }
        outcome
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction{{tid:{}}}", self.state.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("transaction_id", &self.state.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TransactionStatus::Created.is_terminal());
        assert!(!TransactionStatus::Queued.is_terminal());
        assert!(!TransactionStatus::Running.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert_eq!(TransactionStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_install_future_keeps_earlier_failure() {
        let state = TransactionState::new(1);
        state.fail_future(Error::msg("timeout waiting for response"));

        let executor_future = CompletionFuture::new();
        state.install_future(executor_future.clone());

        let installed = state.future.lock().clone().unwrap();
        assert_eq!(
            installed.error().unwrap().to_string(),
            "timeout waiting for response"
        );
        assert!(!executor_future.is_done());
    }

    #[test]
    fn test_fail_future_cancels_installed_one() {
        let state = TransactionState::new(1);
        let future = CompletionFuture::new();
        state.install_future(future.clone());

        state.fail_future(Error::msg("broken pipe"));
        assert!(future.is_cancel_requested());
        assert!(future.is_interrupt_requested());
        assert_eq!(future.error().unwrap().to_string(), "broken pipe");
    }

    #[test]
    fn test_rejected_state() {
        let state = TransactionState::rejected(5, Error::ManagerShutDown);
        assert_eq!(state.status(), TransactionStatus::Failed);
        let future = state.future.lock().clone().unwrap();
        assert!(matches!(future.error(), Some(Error::ManagerShutDown)));
    }

    #[test]
    fn test_cancel_future_without_dispatch() {
        let state = TransactionState::new(2);
        state.cancel_future();
        let future = state.future.lock().clone().unwrap();
        assert!(matches!(
            future.await_completion(&CancellationToken::new()),
            Err(Error::Cancelled)
        ));
    }
}
