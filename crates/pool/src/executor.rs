//! Executor abstraction and the worker pool implementing it
//!
//! [`Executor`] is the seam the transaction manager depends on. The only
//! implementation shipped here is [`WorkerPool`], which comes in two shapes:
//!
//! - **fixed**: a static set of workers created at construction
//! - **elastic**: starts with one worker; two control threads grow the set
//!   while the backlog outruns it and retire workers that sat idle too long
//!   (see [`ElasticSettings`])
//!
//! Both shapes share a bounded queue. Submitting into a full queue blocks the
//! caller until a slot frees up or the caller's token fires.
//!
//! # Lifecycle
//!
//! ```text
//!   created ──start()──► running ──stop()──► shut down
//!      └────────────────stop()──────────────────┘
//! ```
//!
//! A stopped pool stays shut down. Work submitted before `start()` waits in
//! the queue; work still queued at `stop()` is failed with
//! [`Error::ExecutorShutDown`].

use crate::elastic::{spawn_controllers, ElasticSettings};
use crate::future::CompletionFuture;
use crate::work_item::{Operation, WorkItem};
use crate::worker::{Worker, WorkerId};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use plcflow_core::{CancellationToken, Error, Result, WorkItemId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Queue depth used when none is configured.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

/// A pool that runs operations concurrently.
///
/// The transaction manager only talks to this trait, so tests and callers can
/// inject their own implementation.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Queue `operation` and return the future reporting its outcome.
    ///
    /// Never fails synchronously: a rejected submission comes back as an
    /// already-errored future. Blocks only while the queue is full, and gives
    /// up when `token` fires.
    fn submit(
        &self,
        token: &CancellationToken,
        work_item_id: WorkItemId,
        operation: Operation,
    ) -> CompletionFuture;

    /// Start all workers (and control loops, if any).
    fn start(&self);

    /// Force-stop all workers and wait for them to exit.
    fn stop(&self);

    /// Stop the executor and report teardown problems.
    fn close(&self) -> Result<()> {
        self.stop();
        Ok(())
    }

    /// True iff started and not shut down.
    fn is_running(&self) -> bool;

    /// Toggle verbose per-worker logging.
    fn set_trace_workers(&self, _enabled: bool) {}
}

/// State the workers share with their pool.
pub(crate) struct PoolShared {
    queue_tx: Sender<WorkItem>,
    queue_rx: Receiver<WorkItem>,
    queue_depth: usize,
    trace_workers: AtomicBool,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl PoolShared {
    pub(crate) fn new(queue_depth: usize, trace_workers: bool) -> Self {
        let (queue_tx, queue_rx) = bounded(queue_depth);
        Self {
            queue_tx,
            queue_rx,
            queue_depth,
            trace_workers: AtomicBool::new(trace_workers),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn queue(&self) -> &Receiver<WorkItem> {
        &self.queue_rx
    }

    pub(crate) fn sender(&self) -> &Sender<WorkItem> {
        &self.queue_tx
    }

    pub(crate) fn tracing(&self) -> bool {
        self.trace_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.is_shutdown()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Fail everything still queued. Returns how many items were dropped.
    fn fail_queued(&self) -> usize {
        let mut dropped = 0;
        while let Ok(item) = self.queue_rx.try_recv() {
            item.future.fail(Error::ExecutorShutDown);
            dropped += 1;
        }
        dropped
    }
}

#[derive(Default)]
struct Lifecycle {
    controllers: Vec<JoinHandle<()>>,
    stop_controllers: Option<Sender<()>>,
}

pub(crate) struct PoolInner {
    pub(crate) shared: Arc<PoolShared>,
    pub(crate) workers: Mutex<Vec<Worker>>,
    pub(crate) retired: Mutex<Vec<Worker>>,
    next_worker_id: AtomicUsize,
    lifecycle: Mutex<Lifecycle>,
    elastic: Option<ElasticSettings>,
}

impl PoolInner {
    pub(crate) fn new_worker(&self) -> Worker {
        let id: WorkerId = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        Worker::new(id, Arc::clone(&self.shared))
    }
}

/// Bounded-queue thread pool, fixed or elastic.
///
/// # Example
///
/// ```
/// use plcflow_core::CancellationToken;
/// use plcflow_pool::{Executor, WorkerPool};
///
/// let pool = WorkerPool::fixed(2, 10);
/// pool.start();
/// let future = pool.submit(&CancellationToken::new(), 1, Box::new(|| {}));
/// future.await_completion(&CancellationToken::new()).unwrap();
/// pool.stop();
/// ```
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a builder for pool configuration.
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    /// Pool with a static number of workers.
    pub fn fixed(workers: usize, queue_depth: usize) -> Self {
        Self::builder()
            .workers(workers)
            .queue_depth(queue_depth)
            .build()
    }

    /// Pool that scales between one and `max_workers` workers with the
    /// default control-loop timings.
    pub fn elastic(max_workers: usize, queue_depth: usize) -> Self {
        Self::builder()
            .queue_depth(queue_depth)
            .elastic(ElasticSettings::new(max_workers))
            .build()
    }

    /// Number of live (non-retired) workers.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Number of items waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.inner.shared.queue_rx.len()
    }

    /// Queue capacity.
    pub fn queue_depth(&self) -> usize {
        self.inner.shared.queue_depth
    }

    /// Elastic settings, if this pool scales.
    pub fn elastic_settings(&self) -> Option<&ElasticSettings> {
        self.inner.elastic.as_ref()
    }

    /// Check if per-worker logging is on.
    pub fn trace_workers(&self) -> bool {
        self.inner.shared.tracing()
    }

    /// Check if `stop()` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shared.is_shutdown()
    }

    fn enqueue(&self, token: &CancellationToken, mut item: WorkItem) -> CompletionFuture {
        let shared = &self.inner.shared;
        let future = item.future.clone();
        loop {
            match shared.sender().send_timeout(item, token.poll_interval()) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if let Some(err) = token.error() {
                        debug!(work_item_id = back.id, error = %err, "Submission abandoned");
                        future.cancel(false, Some(err));
                        return future;
                    }
                    if shared.is_shutdown() {
                        future.fail(Error::ExecutorShutDown);
                        return future;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    future.fail(Error::ExecutorShutDown);
                    return future;
                }
            }
        }
        // stop() may have drained the queue between our check and the send
        if shared.is_shutdown() {
            shared.fail_queued();
        }
        future
    }
}

impl Executor for WorkerPool {
    fn submit(
        &self,
        token: &CancellationToken,
        work_item_id: WorkItemId,
        operation: Operation,
    ) -> CompletionFuture {
        if self.inner.shared.is_shutdown() {
            warn!(work_item_id, "Submission to a shut down executor");
            return CompletionFuture::failed(Error::ExecutorShutDown);
        }
        let item = WorkItem::new(work_item_id, operation, CompletionFuture::new());
        if self.inner.shared.tracing() {
            debug!(work_item_id, queued = self.queue_len(), "Submitting {}", item);
        }
        self.enqueue(token, item)
    }

    fn start(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();
        if inner.shared.is_shutdown() {
            warn!("Executor was stopped and cannot be restarted");
            return;
        }
        if inner.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Executor already started");
            return;
        }

        for worker in inner.workers.lock().iter() {
            worker.start();
        }

        if let Some(settings) = inner.elastic.clone() {
            let (stop_tx, stop_rx) = bounded(0);
            lifecycle.controllers = spawn_controllers(inner, settings, stop_rx);
            lifecycle.stop_controllers = Some(stop_tx);
        }
    }

    fn stop(&self) {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();
        if inner.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender disconnects the control loops
        drop(lifecycle.stop_controllers.take());
        for controller in lifecycle.controllers.drain(..) {
            if controller.join().is_err() {
                error!("Executor control loop terminated abnormally");
            }
        }

        let mut workers = std::mem::take(&mut *inner.workers.lock());
        workers.append(&mut inner.retired.lock());
        for worker in &workers {
            if worker.is_running() {
                worker.stop(true);
            }
        }
        for worker in &workers {
            worker.join();
        }

        inner.shared.running.store(false, Ordering::SeqCst);
        let dropped = inner.shared.fail_queued();
        if dropped > 0 {
            warn!(dropped, "Failed queued work items on shutdown");
        }
    }

    fn is_running(&self) -> bool {
        self.inner.shared.is_running()
    }

    fn set_trace_workers(&self, enabled: bool) {
        self.inner
            .shared
            .trace_workers
            .store(enabled, Ordering::Relaxed);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("running", &self.is_running())
            .field("shutdown", &self.is_shutdown())
            .field("workers", &*self.inner.workers.lock())
            .field("queue_depth", &self.queue_depth())
            .field("queued", &self.queue_len())
            .field("elastic", &self.inner.elastic)
            .field("trace_workers", &self.trace_workers())
            .finish()
    }
}

/// Builder for [`WorkerPool`].
///
/// # Example
///
/// ```
/// use plcflow_pool::{ElasticSettings, WorkerPool};
/// use std::time::Duration;
///
/// let pool = WorkerPool::builder()
///     .queue_depth(50)
///     .elastic(ElasticSettings::new(8).with_idle_threshold(Duration::from_secs(30)))
///     .build();
/// assert_eq!(pool.worker_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPoolBuilder {
    workers: usize,
    queue_depth: usize,
    trace_workers: bool,
    elastic: Option<ElasticSettings>,
}

impl WorkerPoolBuilder {
    /// Builder with one worker per available CPU and the default queue depth.
    pub fn new() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            trace_workers: false,
            elastic: None,
        }
    }

    /// Number of workers of a fixed pool. Ignored for elastic pools.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Capacity of the work queue.
    pub fn queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Enable verbose per-worker logging.
    pub fn trace_workers(mut self, enabled: bool) -> Self {
        self.trace_workers = enabled;
        self
    }

    /// Make the pool elastic.
    pub fn elastic(mut self, settings: ElasticSettings) -> Self {
        self.elastic = Some(settings);
        self
    }

    /// Build the pool. It still has to be started.
    pub fn build(self) -> WorkerPool {
        let queue_depth = at_least_one(self.queue_depth, "queue_depth");
        let elastic = self.elastic.map(|mut settings| {
            settings.max_workers = at_least_one(settings.max_workers, "max_workers");
            settings.grow_interval =
                at_least_a_millisecond(settings.grow_interval, "grow_interval");
            settings.shrink_interval =
                at_least_a_millisecond(settings.shrink_interval, "shrink_interval");
            settings
        });
        let initial_workers = match elastic {
            Some(_) => 1,
            None => at_least_one(self.workers, "workers"),
        };

        let inner = Arc::new(PoolInner {
            shared: Arc::new(PoolShared::new(queue_depth, self.trace_workers)),
            workers: Mutex::new(Vec::with_capacity(initial_workers)),
            retired: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            lifecycle: Mutex::new(Lifecycle::default()),
            elastic,
        });
        {
            let mut workers = inner.workers.lock();
            for _ in 0..initial_workers {
                workers.push(inner.new_worker());
            }
        }
        WorkerPool { inner }
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn at_least_one(value: usize, name: &'static str) -> usize {
    if value == 0 {
        warn!(setting = name, "Pool setting must be at least 1, using 1");
        1
    } else {
        value
    }
}

/// Controller tick intervals; a zero tick would spin.
fn at_least_a_millisecond(interval: Duration, name: &'static str) -> Duration {
    let floor = Duration::from_millis(1);
    if interval < floor {
        warn!(setting = name, ?interval, "Pool interval must be at least 1ms, using 1ms");
        floor
    } else {
        interval
    }
}
