//! Elastic sizing for worker pools
//!
//! Request volume against field devices comes in bursts (bulk reads and
//! writes) separated by quiet polling gaps. An elastic pool follows that
//! shape with two control threads, started and stopped together with the
//! pool:
//!
//! - **grower**: every `grow_interval`, if more items are queued than there
//!   are workers and the pool is below `max_workers`, adds one worker
//! - **shrinker**: every `shrink_interval`, retires every worker that has
//!   not received an item within `idle_threshold`, keeping at least one
//!
//! Retired workers finish whatever they hold and exit on their own; the pool
//! joins any stragglers when it stops.

use crate::executor::PoolInner;
use crossbeam_channel::{select, tick, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default period of the grower.
pub const DEFAULT_GROW_INTERVAL: Duration = Duration::from_millis(100);

/// Default period of the shrinker.
pub const DEFAULT_SHRINK_INTERVAL: Duration = Duration::from_secs(5);

/// Default idle time after which a worker is retired.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(5);

/// Scaling parameters of an elastic pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticSettings {
    /// Upper bound on live workers
    pub max_workers: usize,
    /// How often the grower checks the backlog
    pub grow_interval: Duration,
    /// How often the shrinker looks for idle workers
    pub shrink_interval: Duration,
    /// Idle time after which a worker is retired
    pub idle_threshold: Duration,
}

impl ElasticSettings {
    /// Settings with default timings.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            grow_interval: DEFAULT_GROW_INTERVAL,
            shrink_interval: DEFAULT_SHRINK_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }

    /// Override the grower period.
    pub fn with_grow_interval(mut self, interval: Duration) -> Self {
        self.grow_interval = interval;
        self
    }

    /// Override the shrinker period.
    pub fn with_shrink_interval(mut self, interval: Duration) -> Self {
        self.shrink_interval = interval;
        self
    }

    /// Override the idle threshold.
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }
}

/// Launch grower and shrinker. Both exit once `stop` disconnects or the pool
/// is no longer running.
pub(crate) fn spawn_controllers(
    inner: &Arc<PoolInner>,
    settings: ElasticSettings,
    stop: Receiver<()>,
) -> Vec<JoinHandle<()>> {
    let mut controllers = Vec::with_capacity(2);

    let grower = {
        let inner = Arc::clone(inner);
        let stop = stop.clone();
        let settings = settings.clone();
        thread::Builder::new()
            .name("plcflow-grower".to_string())
            .spawn(move || {
                control_loop(&inner, &stop, settings.grow_interval, |inner| {
                    inner.grow(settings.max_workers);
                })
            })
    };
    let shrinker = {
        let inner = Arc::clone(inner);
        thread::Builder::new()
            .name("plcflow-shrinker".to_string())
            .spawn(move || {
                control_loop(&inner, &stop, settings.shrink_interval, |inner| {
                    inner.shrink(settings.idle_threshold);
                })
            })
    };

    for spawned in [grower, shrinker] {
        match spawned {
            Ok(handle) => controllers.push(handle),
            Err(e) => error!(error = %e, "Failed to spawn pool control loop"),
        }
    }
    controllers
}

fn control_loop<F>(inner: &PoolInner, stop: &Receiver<()>, interval: Duration, mut step: F)
where
    F: FnMut(&PoolInner),
{
    let ticker = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if !inner.shared.is_running() {
                    break;
                }
                step(inner);
            }
        }
    }
}

impl PoolInner {
    /// Add one worker if the backlog outruns the worker set.
    ///
    /// Returns `true` if a worker was added.
    pub(crate) fn grow(&self, max_workers: usize) -> bool {
        let mut workers = self.workers.lock();
        let backlog = self.shared.queue().len();
        if backlog <= workers.len() || workers.len() >= max_workers {
            return false;
        }

        let worker = self.new_worker();
        // Fresh workers count as busy so the shrinker does not reap them at once
        worker.touch();
        worker.start();
        if self.shared.tracing() {
            debug!(
                worker_id = worker.id(),
                backlog,
                workers = workers.len() + 1,
                "Added worker"
            );
        }
        workers.push(worker);
        true
    }

    /// Retire workers idle for longer than `idle_threshold`, keeping at least
    /// one. Returns how many were retired.
    pub(crate) fn shrink(&self, idle_threshold: Duration) -> usize {
        let now = Instant::now();
        let mut retired = self.retired.lock();
        // Reap retirees that have exited since the last pass
        retired.retain(|worker| !worker.is_finished());

        let mut workers = self.workers.lock();
        let (mut idle, busy): (Vec<_>, Vec<_>) = workers
            .drain(..)
            .partition(|worker| now.duration_since(worker.last_received()) > idle_threshold);
        *workers = busy;
        if workers.is_empty() {
            // Keep the most recently used idle worker as the baseline
            idle.sort_by_key(|worker| worker.last_received());
            if let Some(keep) = idle.pop() {
                workers.push(keep);
            }
        }

        let count = idle.len();
        for worker in idle {
            if self.shared.tracing() {
                debug!(worker_id = worker.id(), "Retiring idle worker");
            }
            worker.retire();
            retired.push(worker);
        }
        count
    }
}
