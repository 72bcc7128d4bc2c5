//! Single-assignment completion handle for submitted work
//!
//! A [`CompletionFuture`] starts pending and transitions exactly once to a
//! terminal outcome:
//!
//! ```text
//!            complete()
//!   Pending ───────────────► Completed
//!      │    cancel(_, None)
//!      ├───────────────────► Cancelled
//!      │    cancel(_, Some(e)) / failed(e)
//!      └───────────────────► Errored(e)
//! ```
//!
//! The first terminal transition wins; later `complete` or `cancel` calls
//! leave the outcome untouched. Awaiters block on a condition variable in
//! slices of at most one poll interval so their cancellation token is
//! re-checked regularly.

use parking_lot::{Condvar, Mutex};
use plcflow_core::{CancellationToken, Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    Completed,
    Errored(Error),
    Cancelled,
}

#[derive(Debug)]
struct FutureState {
    outcome: Mutex<Outcome>,
    resolved: Condvar,
    cancel_requested: AtomicBool,
    interrupt_requested: AtomicBool,
}

/// Awaitable, cancellable result of one work item.
///
/// Cloning yields another handle to the same result cell.
#[derive(Debug, Clone)]
pub struct CompletionFuture {
    state: Arc<FutureState>,
}

impl CompletionFuture {
    /// Create a pending future.
    pub fn new() -> Self {
        Self::with_outcome(Outcome::Pending)
    }

    /// Create a future that is already resolved with `err`.
    ///
    /// Used for rejected submissions: nothing is queued and every awaiter
    /// sees `err` immediately.
    pub fn failed(err: Error) -> Self {
        Self::with_outcome(Outcome::Errored(err))
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            state: Arc::new(FutureState {
                outcome: Mutex::new(outcome),
                resolved: Condvar::new(),
                cancel_requested: AtomicBool::new(false),
                interrupt_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Request cancellation.
    ///
    /// Without `err` the future resolves as cancelled; with `err` it resolves
    /// errored with that cause. Has no effect once the future is terminal,
    /// so calling it repeatedly is harmless. Never blocks on the work itself:
    /// an operation that already started keeps running.
    pub fn cancel(&self, interrupt: bool, err: Option<Error>) {
        let mut outcome = self.state.outcome.lock();
        if !matches!(*outcome, Outcome::Pending) {
            return;
        }
        self.state.cancel_requested.store(true, Ordering::SeqCst);
        if interrupt {
            self.state.interrupt_requested.store(true, Ordering::SeqCst);
        }
        *outcome = match err {
            Some(err) => Outcome::Errored(err),
            None => Outcome::Cancelled,
        };
        self.state.resolved.notify_all();
    }

    /// Mark the work as successfully executed.
    ///
    /// Returns `false` if the future was already terminal.
    pub fn complete(&self) -> bool {
        self.resolve(Outcome::Completed)
    }

    /// Resolve a pending future with `err` without flagging a cancellation.
    ///
    /// Returns `false` if the future was already terminal.
    pub fn fail(&self, err: Error) -> bool {
        self.resolve(Outcome::Errored(err))
    }

    fn resolve(&self, terminal: Outcome) -> bool {
        let mut outcome = self.state.outcome.lock();
        if !matches!(*outcome, Outcome::Pending) {
            return false;
        }
        *outcome = terminal;
        self.state.resolved.notify_all();
        true
    }

    /// Check if the work ran to completion.
    pub fn is_completed(&self) -> bool {
        matches!(*self.state.outcome.lock(), Outcome::Completed)
    }

    /// Check if the future resolved with an error.
    pub fn is_errored(&self) -> bool {
        matches!(*self.state.outcome.lock(), Outcome::Errored(_))
    }

    /// Check if cancellation was requested before the future resolved.
    pub fn is_cancel_requested(&self) -> bool {
        self.state.cancel_requested.load(Ordering::SeqCst)
    }

    /// Check if the cancellation asked for an interrupt.
    pub fn is_interrupt_requested(&self) -> bool {
        self.state.interrupt_requested.load(Ordering::SeqCst)
    }

    /// Check if the future reached any terminal outcome.
    pub fn is_done(&self) -> bool {
        !matches!(*self.state.outcome.lock(), Outcome::Pending)
    }

    /// The captured error, if the future resolved errored.
    pub fn error(&self) -> Option<Error> {
        match &*self.state.outcome.lock() {
            Outcome::Errored(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Block until the future is terminal or `token` fires.
    ///
    /// # Returns
    /// - `Ok(())` once completed
    /// - the captured error if errored
    /// - [`Error::Cancelled`] if cancelled without a cause
    /// - the token's error if it fired while the future was still pending
    ///
    /// Once terminal, every call returns the same outcome.
    pub fn await_completion(&self, token: &CancellationToken) -> Result<()> {
        let mut outcome = self.state.outcome.lock();
        loop {
            match &*outcome {
                Outcome::Completed => return Ok(()),
                Outcome::Errored(err) => return Err(err.clone()),
                Outcome::Cancelled => return Err(Error::Cancelled),
                Outcome::Pending => {}
            }
            if let Some(err) = token.error() {
                return Err(err);
            }
            let interval = token.poll_interval();
            self.state.resolved.wait_for(&mut outcome, interval);
        }
    }
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}
