//! Cooperative cancellation for blocking waits
//!
//! A [`CancellationToken`] is handed to every call that may block
//! (awaiting a future, submitting into a full queue). The blocking call
//! checks the token between short waits and gives up once it fires.
//!
//! Clones share state: cancelling any clone cancels all of them.

use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for a single sleep between cancellation checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Shared, cloneable cancellation signal with an optional deadline.
///
/// # Example
///
/// ```
/// use plcflow_core::CancellationToken;
/// use std::time::Duration;
///
/// let token = CancellationToken::with_timeout(Duration::from_secs(5));
/// assert!(!token.is_cancelled());
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Token that only fires when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires after `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Token that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Cancel this token and every clone of it.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    /// Deadline of this token, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Check whether the token has fired (explicitly or by deadline).
    pub fn is_cancelled(&self) -> bool {
        self.error().is_some()
    }

    /// The error a blocked call should return, or `None` while still live.
    ///
    /// Explicit cancellation takes precedence over an expired deadline.
    pub fn error(&self) -> Option<Error> {
        if self.state.cancelled.load(Ordering::SeqCst) {
            return Some(Error::ContextCancelled);
        }
        match self.state.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// How long a blocked call may wait before re-checking this token.
    ///
    /// Never more than [`POLL_INTERVAL`], shorter when the deadline is closer.
    pub fn poll_interval(&self) -> Duration {
        match self.state.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }

    /// Sleep for at most one poll interval, then report whether the token fired.
    pub fn sleep(&self) -> Option<Error> {
        let interval = self.poll_interval();
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
        self.error()
    }
}
