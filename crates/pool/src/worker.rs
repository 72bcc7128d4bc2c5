//! Worker threads that drain an executor's queue
//!
//! Each [`Worker`] owns one OS thread running a loop that waits for either a
//! work item or an interrupt signal:
//!
//! ```text
//!   idle ──start()──► running ──stop(_)──► stopped
//! ```
//!
//! There is no way back to idle. A graceful stop lets the current item
//! finish and exits on the next loop check; an interrupting stop also wakes
//! a worker that is blocked waiting for work.
//!
//! A panic inside an operation is caught at the item boundary, logged, and
//! reported through the item's future as [`Error::Panicked`]. The loop then
//! carries on unless the worker is shutting down.

use crate::executor::PoolShared;
use crate::work_item::WorkItem;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use plcflow_core::Error;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Identifier of a worker within its pool.
pub type WorkerId = usize;

struct WorkerState {
    id: WorkerId,
    pool: Arc<PoolShared>,
    running: AtomicBool,
    shutdown: AtomicBool,
    interrupted: AtomicBool,
    last_received: Mutex<Instant>,
    interrupt_tx: Sender<()>,
    interrupt_rx: Receiver<()>,
}

/// One execution thread of a pool.
pub struct Worker {
    state: Arc<WorkerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, pool: Arc<PoolShared>) -> Self {
        let (interrupt_tx, interrupt_rx) = bounded(1);
        Self {
            state: Arc::new(WorkerState {
                id,
                pool,
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                last_received: Mutex::new(Instant::now()),
                interrupt_tx,
                interrupt_rx,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Worker id
    pub fn id(&self) -> WorkerId {
        self.state.id
    }

    /// Check if the execution loop is live.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Check if a stop was requested.
    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    /// When this worker last took an item from the queue.
    pub fn last_received(&self) -> Instant {
        *self.state.last_received.lock()
    }

    /// Pretend an item was just received so idle detection leaves us alone.
    pub(crate) fn touch(&self) {
        *self.state.last_received.lock() = Instant::now();
    }

    /// Launch the execution loop on its own thread.
    pub fn start(&self) {
        if self.state.running.swap(true, Ordering::SeqCst) {
            warn!(worker_id = self.state.id, "Worker already started");
            return;
        }
        if self.state.shutdown.load(Ordering::SeqCst) {
            warn!(worker_id = self.state.id, "Worker was stopped and cannot be restarted");
            self.state.running.store(false, Ordering::SeqCst);
            return;
        }

        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(format!("plcflow-worker-{}", self.state.id))
            .spawn(move || state.work());
        match spawned {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                error!(worker_id = self.state.id, error = %e, "Failed to spawn worker thread");
                self.state.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Ask the loop to exit.
    ///
    /// With `interrupt` the worker also stops waiting for new work right away
    /// and discards an item it has received but not yet started.
    pub fn stop(&self, interrupt: bool) {
        if !self.state.running.load(Ordering::SeqCst) {
            warn!(worker_id = self.state.id, "Worker not running");
            return;
        }
        self.state.shutdown.store(true, Ordering::SeqCst);
        if interrupt {
            self.state.interrupted.store(true, Ordering::SeqCst);
            // A pending signal is as good as a new one
            let _ = self.state.interrupt_tx.try_send(());
        }
        if self.state.pool.tracing() {
            debug!(worker_id = self.state.id, interrupt, "Worker stop requested");
        }
    }

    /// Wake an idle worker and let it exit without discarding anything.
    ///
    /// An item grabbed concurrently with retirement still runs.
    pub(crate) fn retire(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        let _ = self.state.interrupt_tx.try_send(());
    }

    /// Check if the thread has exited (or was never spawned).
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Block until the thread has exited.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker_id = self.state.id, "Worker thread terminated abnormally");
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.state.id)
            .field("running", &self.is_running())
            .field("shutdown", &self.is_shutdown())
            .field(
                "interrupted",
                &self.state.interrupted.load(Ordering::SeqCst),
            )
            .field("idle_for", &self.last_received().elapsed())
            .finish()
    }
}

impl WorkerState {
    fn work(&self) {
        if self.pool.tracing() {
            debug!(worker_id = self.id, "Worker loop started");
        }
        while !self.shutdown.load(Ordering::SeqCst) {
            select! {
                recv(self.pool.queue()) -> item => match item {
                    Ok(item) => self.execute(item),
                    // Queue disconnected: the pool is gone
                    Err(_) => break,
                },
                recv(self.interrupt_rx) -> _ => {
                    if self.pool.tracing() {
                        debug!(worker_id = self.id, "Worker interrupted");
                    }
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        if self.pool.tracing() {
            debug!(worker_id = self.id, "Worker loop exited");
        }
    }

    fn execute(&self, item: WorkItem) {
        *self.last_received.lock() = Instant::now();
        let WorkItem {
            id,
            operation,
            future,
        } = item;

        if future.is_cancel_requested() {
            if self.pool.tracing() {
                debug!(worker_id = self.id, work_item_id = id, "Skipping canceled work item");
            }
            return;
        }
        if self.shutdown.load(Ordering::SeqCst) && self.interrupted.load(Ordering::SeqCst) {
            if self.pool.tracing() {
                debug!(worker_id = self.id, work_item_id = id, "Dropping work item on interrupt");
            }
            future.fail(Error::ExecutorShutDown);
            return;
        }

        if self.pool.tracing() {
            debug!(worker_id = self.id, work_item_id = id, "Running work item");
        }
        match panic::catch_unwind(AssertUnwindSafe(operation)) {
            Ok(()) => {
                future.complete();
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let restarting = !self.shutdown.load(Ordering::SeqCst);
                error!(
                    worker_id = self.id,
                    work_item_id = id,
                    panic = %message,
                    restarting,
                    "Operation panicked"
                );
                future.fail(Error::Panicked {
                    work_item_id: id,
                    message,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
