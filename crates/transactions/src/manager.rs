//! Request transaction manager: admission control in front of an executor
//!
//! Every protocol driver bounds how many requests are in flight against one
//! device. The manager enforces that bound:
//!
//! 1. `start_transaction()` allocates the next transaction id
//! 2. `Transaction::submit()` appends the transaction to a FIFO backlog
//! 3. `process_worklog()` moves the oldest backlog entries into the running
//!    set while it is below the cap, dispatching each to the executor
//! 4. `end_request()` / `fail_request()` release the slot and run step 3
//!    again, so a freed slot always goes to the oldest waiter
//!
//! # Thread Safety
//!
//! Two short-held locks guard the bookkeeping: one for the running set and
//! its cap, one for the backlog. When both are needed the running-set lock
//! is taken first. Neither is held while calling into the executor, because
//! a full executor queue can only drain if operations are able to end their
//! transactions.

use crate::shared::{is_shared, shared_executor};
use crate::transaction::{Transaction, TransactionState, TransactionStatus};
use parking_lot::Mutex;
use plcflow_core::{CancellationToken, Error, Result, TransactionId, POLL_INTERVAL};
use plcflow_pool::Executor;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Concurrency cap used when none is configured.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 1;

struct RunningRequests {
    limit: usize,
    requests: FxHashMap<TransactionId, Arc<TransactionState>>,
}

pub(crate) struct ManagerInner {
    running: Mutex<RunningRequests>,
    worklog: Mutex<VecDeque<Arc<TransactionState>>>,
    next_transaction_id: AtomicU64,
    executor: Arc<dyn Executor>,
    owns_executor: bool,
    shutdown: AtomicBool,
    trace_transactions: bool,
}

impl ManagerInner {
    pub(crate) fn submit_transaction(&self, state: &Arc<TransactionState>) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            self.reject(state);
            return Err(Error::ManagerShutDown);
        }
        *state.status.lock() = TransactionStatus::Queued;
        self.worklog.lock().push_back(Arc::clone(state));
        if self.trace_transactions {
            debug!(transaction_id = state.id, "Transaction queued");
        }
        if self.shutdown.load(Ordering::SeqCst) {
            // Closed while we were queueing: close() may already have swept
            self.discard_backlog();
            return Err(Error::ManagerShutDown);
        }
        self.process_worklog();
        Ok(())
    }

    /// Admit backlog entries, oldest first, while there is capacity.
    fn process_worklog(&self) {
        let admitted = {
            let mut running = self.running.lock();
            let mut admitted = Vec::new();
            while running.requests.len() < running.limit {
                let next = self.worklog.lock().pop_front();
                let Some(next) = next else { break };
                {
                    let mut status = next.status.lock();
                    if status.is_terminal() {
                        continue;
                    }
                    *status = TransactionStatus::Running;
                }
                running.requests.insert(next.id, Arc::clone(&next));
                admitted.push(next);
            }
            admitted
        };

        for state in admitted {
            if self.trace_transactions {
                debug!(transaction_id = state.id, "Transaction admitted");
            }
            let operation = state.operation.lock().take();
            match operation {
                Some(operation) => {
                    let future =
                        self.executor
                            .submit(&CancellationToken::new(), state.id, operation);
                    state.install_future(future);
                }
                None => {
                    let err = Error::NoOperation {
                        transaction_id: state.id,
                    };
                    warn!(transaction_id = state.id, "Admitted transaction without operation");
                    // Cannot be completed yet, so this only releases the slot
                    let _ = self.fail_request(&state, err);
                }
            }
        }
    }

    pub(crate) fn end_request(&self, state: &Arc<TransactionState>) -> Result<()> {
        let was_queued = self.finish(state, TransactionStatus::Completed)?;
        if was_queued {
            // Never dispatched: leave awaiters an answer
            state.cancel_future();
        }
        self.ended(state);
        Ok(())
    }

    pub(crate) fn fail_request(&self, state: &Arc<TransactionState>, err: Error) -> Result<()> {
        self.finish(state, TransactionStatus::Failed)?;
        if self.trace_transactions {
            debug!(transaction_id = state.id, error = %err, "Transaction failed");
        }
        state.fail_future(err);
        self.ended(state);
        Ok(())
    }

    /// Move a tracked transaction into a terminal status, exactly once, and
    /// drop it from whichever collection holds it.
    ///
    /// Runs under the running-set lock, so admission cannot pop the entry
    /// halfway through. Nothing is mutated on error. Returns `true` if the
    /// transaction was still in the backlog.
    fn finish(&self, state: &TransactionState, terminal: TransactionStatus) -> Result<bool> {
        let mut running = self.running.lock();
        let mut status = state.status.lock();
        if status.is_terminal() {
            return Err(Error::AlreadyCompleted {
                transaction_id: state.id,
            });
        }
        if *status == TransactionStatus::Created {
            return Err(Error::UnknownTransaction {
                transaction_id: state.id,
            });
        }

        let was_running = running.requests.remove(&state.id).is_some();
        let was_queued = !was_running && {
            let mut worklog = self.worklog.lock();
            let before = worklog.len();
            worklog.retain(|queued| queued.id != state.id);
            worklog.len() != before
        };
        if !was_running && !was_queued {
            debug!(transaction_id = state.id, "Transaction not tracked by manager");
            return Err(Error::UnknownTransaction {
                transaction_id: state.id,
            });
        }
        *status = terminal;
        if was_queued {
            state.operation.lock().take();
        }
        Ok(was_queued)
    }

    /// Backfill the slot or backlog position a finished transaction freed.
    fn ended(&self, state: &TransactionState) {
        if self.trace_transactions {
            debug!(transaction_id = state.id, status = %state.status(), "Transaction ended");
        }
        self.process_worklog();
    }

    pub(crate) fn is_active(&self, transaction_id: TransactionId) -> bool {
        self.running.lock().requests.contains_key(&transaction_id)
    }

    fn reject(&self, state: &TransactionState) {
        *state.status.lock() = TransactionStatus::Failed;
        state.operation.lock().take();
        state.fail_future(Error::ManagerShutDown);
    }

    /// Fail every backlog entry. Returns how many were dropped.
    fn discard_backlog(&self) -> usize {
        let backlog: Vec<_> = self.worklog.lock().drain(..).collect();
        for state in &backlog {
            self.reject(state);
        }
        backlog.len()
    }
}

/// Admission-controlled front door to an executor.
///
/// Cloning yields another handle to the same manager.
///
/// # Example
///
/// ```
/// use plcflow_core::CancellationToken;
/// use plcflow_transactions::TransactionManager;
///
/// let manager = TransactionManager::new(2);
/// let transaction = manager.start_transaction();
/// let handle = transaction.clone();
/// transaction
///     .submit(move || {
///         // write the request, wait for the response ...
///         handle.end_request().unwrap();
///     })
///     .unwrap();
/// transaction.await_completion(&CancellationToken::new()).unwrap();
/// ```
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Manager with a cap of `concurrent_requests` on the shared executor.
    pub fn new(concurrent_requests: usize) -> Self {
        Self::builder()
            .concurrent_requests(concurrent_requests)
            .build()
    }

    /// Create a builder for manager configuration.
    pub fn builder() -> TransactionManagerBuilder {
        TransactionManagerBuilder::new()
    }

    /// Start a new transaction.
    ///
    /// On a closed manager the transaction is born failed with
    /// [`Error::ManagerShutDown`] and is never scheduled.
    pub fn start_transaction(&self) -> Transaction {
        let inner = &self.inner;
        let id = inner.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        let state = if inner.shutdown.load(Ordering::SeqCst) {
            if inner.trace_transactions {
                debug!(transaction_id = id, "Transaction started on closed manager");
            }
            TransactionState::rejected(id, Error::ManagerShutDown)
        } else {
            if inner.trace_transactions {
                debug!(transaction_id = id, "Transaction started");
            }
            TransactionState::new(id)
        };
        Transaction {
            state: Arc::new(state),
            manager: Arc::clone(inner),
        }
    }

    /// Change the concurrency cap.
    ///
    /// Lowering it below the number of running transactions does not preempt
    /// them; the new cap takes effect as they finish.
    pub fn set_number_of_concurrent_requests(&self, concurrent_requests: usize) {
        {
            let mut running = self.inner.running.lock();
            if concurrent_requests < running.requests.len() {
                warn!(
                    concurrent_requests,
                    running = running.requests.len(),
                    "Lowering cap below running transactions; they will finish first"
                );
            }
            running.limit = concurrent_requests;
        }
        self.inner.process_worklog();
    }

    /// Current concurrency cap.
    pub fn number_of_concurrent_requests(&self) -> usize {
        self.inner.running.lock().limit
    }

    /// Number of transactions occupying a slot.
    pub fn number_of_active_requests(&self) -> usize {
        self.inner.running.lock().requests.len()
    }

    /// Number of transactions waiting for a slot.
    pub fn backlog_len(&self) -> usize {
        self.inner.worklog.lock().len()
    }

    /// Check if the manager was closed.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Executor running admitted operations.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    /// Close without waiting for running transactions.
    pub fn close(&self) -> Result<()> {
        self.close_graceful(Duration::ZERO)
    }

    /// Close the manager.
    ///
    /// New transactions are refused right away. With a non-zero `timeout`,
    /// waits up to that long for running transactions (and the backlog
    /// feeding into them) to finish. Whatever is left afterwards is
    /// discarded: backlog entries fail with [`Error::ManagerShutDown`]. An
    /// injected executor is closed as well; the shared one never is.
    pub fn close_graceful(&self, timeout: Duration) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Transaction manager already closed");
            return Ok(());
        }

        if !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            loop {
                let active = self.number_of_active_requests();
                if active == 0 && self.backlog_len() == 0 {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    warn!(active, ?timeout, "Timed out waiting for running transactions");
                    break;
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        }

        let discarded = inner.discard_backlog();
        let abandoned = {
            let mut running = inner.running.lock();
            let abandoned = running.requests.len();
            running.requests.clear();
            abandoned
        };
        if discarded > 0 || abandoned > 0 {
            warn!(discarded, abandoned, "Closed transaction manager with unfinished work");
        }

        if inner.owns_executor {
            inner.executor.close()
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (limit, mut running) = {
            let running = self.inner.running.lock();
            (running.limit, running.requests.keys().copied().collect::<Vec<_>>())
        };
        running.sort_unstable();
        let backlog: Vec<_> = self.inner.worklog.lock().iter().map(|s| s.id).collect();
        f.debug_struct("TransactionManager")
            .field("number_of_concurrent_requests", &limit)
            .field("running_requests", &running)
            .field("backlog", &backlog)
            .field(
                "next_transaction_id",
                &self.inner.next_transaction_id.load(Ordering::SeqCst),
            )
            .field("executor", &self.inner.executor)
            .field("shutdown", &self.is_shutdown())
            .field("trace_transactions", &self.inner.trace_transactions)
            .finish()
    }
}

/// Builder for [`TransactionManager`].
///
/// # Example
///
/// ```
/// use plcflow_pool::{Executor, WorkerPool};
/// use plcflow_transactions::TransactionManager;
/// use std::sync::Arc;
///
/// let pool = WorkerPool::fixed(4, 16);
/// pool.start();
/// let manager = TransactionManager::builder()
///     .concurrent_requests(3)
///     .executor(Arc::new(pool))
///     .trace_transactions(true)
///     .build();
/// assert_eq!(manager.number_of_concurrent_requests(), 3);
/// ```
pub struct TransactionManagerBuilder {
    concurrent_requests: usize,
    executor: Option<Arc<dyn Executor>>,
    trace_transactions: bool,
    trace_workers: bool,
}

impl TransactionManagerBuilder {
    /// Builder with a cap of one request and the shared executor.
    pub fn new() -> Self {
        Self {
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            executor: None,
            trace_transactions: false,
            trace_workers: false,
        }
    }

    /// Maximum number of concurrently running transactions.
    pub fn concurrent_requests(mut self, concurrent_requests: usize) -> Self {
        self.concurrent_requests = concurrent_requests;
        self
    }

    /// Run admitted operations on `executor` instead of the shared one.
    ///
    /// The manager closes this executor when it is closed.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Enable verbose per-transaction logging.
    pub fn trace_transactions(mut self, enabled: bool) -> Self {
        self.trace_transactions = enabled;
        self
    }

    /// Enable verbose per-worker logging on the executor.
    pub fn trace_workers(mut self, enabled: bool) -> Self {
        self.trace_workers = enabled;
        self
    }

    /// Build the manager.
    pub fn build(self) -> TransactionManager {
        let (executor, owns_executor) = match self.executor {
            Some(executor) => {
                let owned = !is_shared(&executor);
                (executor, owned)
            }
            None => (shared_executor(), false),
        };
        if self.trace_workers {
            executor.set_trace_workers(true);
        }
        TransactionManager {
            inner: Arc::new(ManagerInner {
                running: Mutex::new(RunningRequests {
                    limit: self.concurrent_requests,
                    requests: FxHashMap::default(),
                }),
                worklog: Mutex::new(VecDeque::new()),
                next_transaction_id: AtomicU64::new(1),
                executor,
                owns_executor,
                shutdown: AtomicBool::new(false),
                trace_transactions: self.trace_transactions,
            }),
        }
    }
}

impl Default for TransactionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcflow_core::WorkItemId;
    use plcflow_pool::{CompletionFuture, Operation, WorkerPool};
    use std::sync::atomic::AtomicUsize;

    /// Executor double that parks submissions until the test runs them.
    #[derive(Default)]
    struct ManualExecutor {
        #[allow(clippy::type_complexity)]
        submitted: Mutex<VecDeque<(WorkItemId, Operation, CompletionFuture)>>,
        closed: AtomicUsize,
    }

    impl ManualExecutor {
        fn submitted_ids(&self) -> Vec<WorkItemId> {
            self.submitted.lock().iter().map(|(id, _, _)| *id).collect()
        }

        /// Run the oldest submission on the calling thread.
        fn run_next(&self) -> Option<WorkItemId> {
            let (id, operation, future) = self.submitted.lock().pop_front()?;
            operation();
            future.complete();
            Some(id)
        }
    }

    impl fmt::Debug for ManualExecutor {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ManualExecutor")
                .field("submitted", &self.submitted_ids())
                .finish()
        }
    }

    impl Executor for ManualExecutor {
        fn submit(
            &self,
            _token: &CancellationToken,
            work_item_id: WorkItemId,
            operation: Operation,
        ) -> CompletionFuture {
            let future = CompletionFuture::new();
            self.submitted
                .lock()
                .push_back((work_item_id, operation, future.clone()));
            future
        }

        fn start(&self) {}

        fn stop(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            true
        }
    }

    fn manual(limit: usize) -> (TransactionManager, Arc<ManualExecutor>) {
        let executor = Arc::new(ManualExecutor::default());
        let manager = TransactionManager::builder()
            .concurrent_requests(limit)
            .executor(executor.clone())
            .trace_transactions(true)
            .build();
        (manager, executor)
    }

    /// Submit an operation that ends its own transaction.
    fn submit_ending(transaction: &Transaction) {
        let handle = transaction.clone();
        transaction
            .submit(move || {
                handle.end_request().unwrap();
            })
            .unwrap();
    }

    #[test]
    fn test_new_manager() {
        let manager = TransactionManager::new(3);
        assert_eq!(manager.number_of_concurrent_requests(), 3);
        assert_eq!(manager.number_of_active_requests(), 0);
        assert_eq!(manager.backlog_len(), 0);
        assert!(!manager.is_shutdown());
        assert!(is_shared(manager.executor()));
        assert!(!manager.inner.owns_executor);
    }

    #[test]
    fn test_injected_executor_is_owned() {
        let (manager, _) = manual(1);
        assert!(manager.inner.owns_executor);

        let shared = TransactionManager::builder()
            .executor(shared_executor())
            .build();
        assert!(!shared.inner.owns_executor);
    }

    #[test]
    fn test_start_transaction_ids_increase() {
        let (manager, _) = manual(1);
        let a = manager.start_transaction();
        let b = manager.start_transaction();
        assert_eq!(a.transaction_id(), 1);
        assert_eq!(b.transaction_id(), 2);
        assert_eq!(a.status(), TransactionStatus::Created);
        assert_eq!(a.to_string(), "Transaction{tid:1}");
    }

    #[test]
    fn test_start_transaction_in_shutdown() {
        let (manager, _) = manual(1);
        manager.close().unwrap();

        let transaction = manager.start_transaction();
        assert!(transaction.is_completed());
        assert!(matches!(
            transaction.await_completion(&CancellationToken::new()),
            Err(Error::ManagerShutDown)
        ));
        assert!(matches!(
            transaction.submit(|| {}),
            Err(Error::AlreadyCompleted { .. })
        ));
    }

    #[test]
    fn test_submit_dispatches_when_capacity_free() {
        let (manager, executor) = manual(2);
        let transaction = manager.start_transaction();
        submit_ending(&transaction);

        assert_eq!(transaction.status(), TransactionStatus::Running);
        assert_eq!(executor.submitted_ids(), vec![transaction.transaction_id()]);
        assert!(transaction.completion_future().is_some());
        assert_eq!(manager.number_of_active_requests(), 1);

        executor.run_next();
        assert_eq!(transaction.status(), TransactionStatus::Completed);
        assert_eq!(manager.number_of_active_requests(), 0);
        transaction
            .await_completion(&CancellationToken::new())
            .unwrap();
    }

    #[test]
    fn test_process_worklog_is_fifo() {
        let (manager, executor) = manual(1);
        let transactions: Vec<_> = (0..4).map(|_| manager.start_transaction()).collect();
        for transaction in &transactions {
            submit_ending(transaction);
        }

        assert_eq!(manager.number_of_active_requests(), 1);
        assert_eq!(manager.backlog_len(), 3);
        assert_eq!(transactions[1].status(), TransactionStatus::Queued);

        let mut order = Vec::new();
        while let Some(id) = executor.run_next() {
            order.push(id);
        }
        let expected: Vec<_> = transactions.iter().map(|t| t.transaction_id()).collect();
        assert_eq!(order, expected);
        assert_eq!(manager.backlog_len(), 0);
        assert_eq!(manager.number_of_active_requests(), 0);
    }

    #[test]
    fn test_end_request_twice_is_rejected() {
        let (manager, executor) = manual(1);
        let first = manager.start_transaction();
        first.submit(|| {}).unwrap();
        let second = manager.start_transaction();
        first.submit(|| {}).unwrap(); // ignored double submit
        submit_ending(&second);

        assert_eq!(executor.submitted_ids(), vec![first.transaction_id()]);
        first.end_request().unwrap();
        assert!(matches!(
            first.end_request(),
            Err(Error::AlreadyCompleted { transaction_id }) if transaction_id == first.transaction_id()
        ));
        // The second call did not free another slot
        assert_eq!(manager.number_of_active_requests(), 1);
        assert_eq!(second.status(), TransactionStatus::Running);
    }

    #[test]
    fn test_end_request_with_unknown_transaction() {
        let (manager, _) = manual(1);
        let transaction = manager.start_transaction();
        assert!(matches!(
            transaction.end_request(),
            Err(Error::UnknownTransaction { .. })
        ));
        // Not consumed: the transaction can still be used
        assert_eq!(transaction.status(), TransactionStatus::Created);
    }

    #[test]
    fn test_fail_request_frees_slot() {
        let (manager, executor) = manual(1);
        let failing = manager.start_transaction();
        failing.submit(|| {}).unwrap();
        let waiting = manager.start_transaction();
        submit_ending(&waiting);
        assert_eq!(waiting.status(), TransactionStatus::Queued);

        failing
            .fail_request(Error::msg("no response from device"))
            .unwrap();
        assert_eq!(failing.status(), TransactionStatus::Failed);
        assert_eq!(waiting.status(), TransactionStatus::Running);
        assert_eq!(
            executor.submitted_ids(),
            vec![failing.transaction_id(), waiting.transaction_id()]
        );

        let err = failing
            .await_completion(&CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "no response from device");
        assert!(matches!(
            failing.fail_request(Error::Cancelled),
            Err(Error::AlreadyCompleted { .. })
        ));
    }

    #[test]
    fn test_end_request_on_queued_transaction() {
        let (manager, executor) = manual(1);
        let running = manager.start_transaction();
        running.submit(|| {}).unwrap();
        let queued = manager.start_transaction();
        queued.submit(|| {}).unwrap();

        queued.end_request().unwrap();
        assert_eq!(manager.backlog_len(), 0);
        assert!(matches!(
            queued.await_completion(&CancellationToken::new()),
            Err(Error::Cancelled)
        ));
        assert_eq!(executor.submitted_ids(), vec![running.transaction_id()]);
    }

    #[test]
    fn test_await_with_cancelled_token_reports_final_outcome() {
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let (manager, executor) = manual(1);
        let completed = manager.start_transaction();
        submit_ending(&completed);
        executor.run_next();
        let failed = manager.start_transaction();
        failed.submit(|| {}).unwrap();
        failed
            .fail_request(Error::msg("checksum mismatch"))
            .unwrap();

        // Settled outcomes win over the token, every time they are asked for
        for _ in 0..3 {
            completed.await_completion(&cancelled).unwrap();
            let err = failed.await_completion(&cancelled).unwrap_err();
            assert_eq!(err.to_string(), "checksum mismatch");
        }

        manager.close().unwrap();
        let rejected = manager.start_transaction();
        for _ in 0..3 {
            assert!(matches!(
                rejected.await_completion(&cancelled),
                Err(Error::ManagerShutDown)
            ));
        }
    }

    #[test]
    fn test_await_pending_transaction_with_cancelled_token() {
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let (manager, _) = manual(1);
        let transaction = manager.start_transaction();
        transaction.submit(|| {}).unwrap();
        assert!(matches!(
            transaction.await_completion(&cancelled),
            Err(Error::Cancelled)
        ));
        assert_eq!(transaction.status(), TransactionStatus::Running);
    }

    #[test]
    fn test_failed_backlog_entry_is_never_admitted() {
        let (manager, executor) = manual(1);
        let running = manager.start_transaction();
        submit_ending(&running);
        let queued = manager.start_transaction();
        queued.submit(|| {}).unwrap();

        queued.fail_request(Error::msg("aborted by driver")).unwrap();
        assert_eq!(queued.status(), TransactionStatus::Failed);
        assert_eq!(manager.backlog_len(), 0);

        executor.run_next();
        assert_eq!(queued.status(), TransactionStatus::Failed);
        assert_eq!(executor.submitted_ids(), Vec::<WorkItemId>::new());
        assert_eq!(manager.number_of_active_requests(), 0);
        let err = queued
            .await_completion(&CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "aborted by driver");
    }

    #[test]
    fn test_process_worklog_skips_terminal_entries() {
        let (manager, executor) = manual(1);
        let finished = Arc::new(TransactionState::rejected(99, Error::ManagerShutDown));
        manager.inner.worklog.lock().push_back(finished);

        let transaction = manager.start_transaction();
        transaction.submit(|| {}).unwrap();
        assert_eq!(executor.submitted_ids(), vec![transaction.transaction_id()]);
        assert_eq!(transaction.status(), TransactionStatus::Running);
        assert_eq!(manager.backlog_len(), 0);
        assert!(!manager.inner.is_active(99));
    }

    #[test]
    fn test_end_request_on_abandoned_transaction_changes_nothing() {
        let (manager, _) = manual(1);
        let stuck = manager.start_transaction();
        stuck.submit(|| {}).unwrap();
        manager
            .close_graceful(Duration::from_millis(5))
            .unwrap();

        assert!(matches!(
            stuck.end_request(),
            Err(Error::UnknownTransaction { .. })
        ));
        assert!(matches!(
            stuck.fail_request(Error::msg("late failure")),
            Err(Error::UnknownTransaction { .. })
        ));
        assert_eq!(stuck.status(), TransactionStatus::Running);
        assert!(!stuck.completion_future().unwrap().is_done());
    }

    #[test]
    fn test_set_number_of_concurrent_requests() {
        let (manager, executor) = manual(1);
        let transactions: Vec<_> = (0..3).map(|_| manager.start_transaction()).collect();
        for transaction in &transactions {
            submit_ending(transaction);
        }
        assert_eq!(manager.number_of_active_requests(), 1);

        manager.set_number_of_concurrent_requests(3);
        assert_eq!(manager.number_of_active_requests(), 3);
        assert_eq!(executor.submitted_ids().len(), 3);

        // Lowering does not preempt
        manager.set_number_of_concurrent_requests(1);
        assert_eq!(manager.number_of_active_requests(), 3);

        let late = manager.start_transaction();
        submit_ending(&late);
        executor.run_next();
        executor.run_next();
        assert_eq!(late.status(), TransactionStatus::Queued);
        executor.run_next();
        assert_eq!(late.status(), TransactionStatus::Running);
    }

    #[test]
    fn test_close_closes_injected_executor() {
        let (manager, executor) = manual(1);
        manager.close().unwrap();
        manager.close().unwrap();
        assert_eq!(executor.closed.load(Ordering::SeqCst), 1);
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_close_graceful_timeout_fires() {
        let (manager, executor) = manual(1);
        let stuck = manager.start_transaction();
        stuck.submit(|| {}).unwrap();
        let queued = manager.start_transaction();
        queued.submit(|| {}).unwrap();

        let start = Instant::now();
        manager
            .close_graceful(Duration::from_millis(20))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(manager.number_of_active_requests(), 0);
        assert_eq!(manager.backlog_len(), 0);
        assert!(matches!(
            queued.await_completion(&CancellationToken::new()),
            Err(Error::ManagerShutDown)
        ));
        assert_eq!(executor.closed.load(Ordering::SeqCst), 1);

        // The abandoned transaction can no longer be found
        assert!(matches!(
            stuck.end_request(),
            Err(Error::UnknownTransaction { .. })
        ));
    }

    #[test]
    fn test_submit_after_close_fails() {
        let (manager, executor) = manual(1);
        let transaction = manager.start_transaction();
        manager.close().unwrap();

        assert!(matches!(
            transaction.submit(|| {}),
            Err(Error::ManagerShutDown)
        ));
        assert_eq!(transaction.status(), TransactionStatus::Failed);
        assert!(executor.submitted_ids().is_empty());
    }

    #[test]
    fn test_with_worker_pool() {
        let pool = WorkerPool::fixed(2, 4);
        pool.start();
        let manager = TransactionManager::builder()
            .concurrent_requests(2)
            .executor(Arc::new(pool))
            .trace_workers(true)
            .build();

        let transactions: Vec<_> = (0..6).map(|_| manager.start_transaction()).collect();
        for transaction in &transactions {
            submit_ending(transaction);
        }
        let token = CancellationToken::with_timeout(Duration::from_secs(5));
        for transaction in &transactions {
            transaction.await_completion(&token).unwrap();
            assert_eq!(transaction.status(), TransactionStatus::Completed);
        }
        manager.close().unwrap();
        assert!(!manager.executor().is_running());
    }

    #[test]
    fn test_debug_snapshot() {
        let (manager, _) = manual(3);
        let transaction = manager.start_transaction();
        transaction.submit(|| {}).unwrap();
        let rendered = format!("{:?}", manager);
        assert!(rendered.contains("number_of_concurrent_requests: 3"));
        assert!(rendered.contains("running_requests: [1]"));
    }
}
