use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};
use vigil_core::{AgentConfig, TaskId};

use crate::collector::ScheduleMembership;
use crate::error::CollectorError;
use crate::stats::StatsSink;
use crate::task::Task;

use super::tracker::RunningTracker;
use super::worker::Worker;

static RUNNER_IDS: AtomicU64 = AtomicU64::new(0);
static WORKER_IDS: AtomicU64 = AtomicU64::new(0);

pub(super) type SchedulerLink = Arc<RwLock<Option<Weak<dyn ScheduleMembership>>>>;

/// Bookkeeping for one live worker thread.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub thread_name: String,
    pub started_at: DateTime<Utc>,
}

/// Owns the worker pool and the dispatch queue.
pub struct Runner {
    pub(super) id: u64,
    pub(super) running: AtomicBool,
    pub(super) is_static_worker_count: bool,
    pub(super) max_num_workers: usize,
    pub(super) logging_frequency: u64,
    /// Strong end of the dispatch queue; `None` once stopped.
    pub(super) sender: RwLock<Option<flume::Sender<Arc<dyn Task>>>>,
    pub(super) receiver: flume::Receiver<Arc<dyn Task>>,
    pub(super) workers: Arc<Mutex<HashMap<u64, WorkerInfo>>>,
    pub(super) tracker: Arc<RunningTracker>,
    pub(super) stats: Arc<dyn StatsSink>,
    pub(super) scheduler: SchedulerLink,
    pub(super) skipped: Arc<AtomicU64>,
}

/// Producer handle to the dispatch queue.
///
/// Holds only a weak reference to the queue, so it never keeps the queue open
/// after [`Runner::stop`].
pub struct TaskSender {
    inner: flume::WeakSender<Arc<dyn Task>>,
}

impl TaskSender {
    /// Hand a task to an idle worker, blocking until one takes it.
    pub fn send(&self, task: Arc<dyn Task>) -> Result<(), CollectorError> {
        let sender = self.inner.upgrade().ok_or(CollectorError::RunnerStopped)?;
        sender.send(task).map_err(|_| CollectorError::RunnerStopped)
    }

    /// Like [`send`](Self::send), giving up after `timeout` without a taker.
    /// Returns `Ok(false)` on timeout.
    pub fn send_timeout(
        &self,
        task: Arc<dyn Task>,
        timeout: std::time::Duration,
    ) -> Result<bool, CollectorError> {
        let sender = self.inner.upgrade().ok_or(CollectorError::RunnerStopped)?;
        match sender.send_timeout(task, timeout) {
            Ok(()) => Ok(true),
            Err(flume::SendTimeoutError::Timeout(_)) => Ok(false),
            Err(flume::SendTimeoutError::Disconnected(_)) => Err(CollectorError::RunnerStopped),
        }
    }
}

impl Runner {
    /// Create a runner and start its initial workers.
    ///
    /// A non-zero `check_runners` setting pins the pool size; otherwise the
    /// pool starts at `default_num_workers` and grows with
    /// [`update_num_workers`](Self::update_num_workers).
    pub fn new(config: &AgentConfig, stats: Arc<dyn StatsSink>) -> Arc<Self> {
        let (tx, rx) = flume::bounded(0);
        let is_static_worker_count = config.is_static_worker_count();

        let runner = Arc::new(Self {
            id: RUNNER_IDS.fetch_add(1, Ordering::Relaxed) + 1,
            running: AtomicBool::new(true),
            is_static_worker_count,
            max_num_workers: config.max_num_workers,
            logging_frequency: config.logging_frequency,
            sender: RwLock::new(Some(tx)),
            receiver: rx,
            workers: Arc::new(Mutex::new(HashMap::new())),
            tracker: Arc::new(RunningTracker::new()),
            stats,
            scheduler: Arc::new(RwLock::new(None)),
            skipped: Arc::new(AtomicU64::new(0)),
        });

        let num_workers = if is_static_worker_count {
            config.check_runners
        } else {
            config.default_num_workers
        };
        runner.ensure_min_workers(num_workers);

        runner
    }

    /// Grow the pool to at least `desired` workers.
    pub fn ensure_min_workers(&self, desired: usize) {
        let mut workers = self.workers.lock();
        let current = workers.len();
        if desired <= current {
            return;
        }

        let to_add = desired - current;
        for _ in 0..to_add {
            self.spawn_worker(&mut workers);
        }

        info!("Runner {} added {} workers (total: {})", self.id, to_add, workers.len());
    }

    /// Add a single worker, regardless of the current pool size.
    pub fn add_worker(&self) {
        let mut workers = self.workers.lock();
        self.spawn_worker(&mut workers);
    }

    fn spawn_worker(&self, workers: &mut HashMap<u64, WorkerInfo>) {
        if !self.is_running() {
            warn!("Runner {} is stopped, not adding workers", self.id);
            return;
        }

        let worker_id = WORKER_IDS.fetch_add(1, Ordering::Relaxed) + 1;
        let thread_name = format!("runner-{}-worker-{}", self.id, worker_id);

        let scheduler = Arc::clone(&self.scheduler);
        let worker = Worker {
            id: worker_id,
            runner_id: self.id,
            tasks: self.receiver.clone(),
            tracker: Arc::clone(&self.tracker),
            stats: Arc::clone(&self.stats),
            should_add_work_stats: Box::new(move |id| membership_allows(&scheduler, id)),
            logging_frequency: self.logging_frequency,
            skipped: Arc::clone(&self.skipped),
        };

        // Registered before the thread starts so a worker that exits right
        // away cannot remove itself before it was added.
        workers.insert(
            worker_id,
            WorkerInfo {
                thread_name: thread_name.clone(),
                started_at: Utc::now(),
            },
        );

        let registry = Arc::clone(&self.workers);
        let stats = Arc::clone(&self.stats);
        let spawned = thread::Builder::new().name(thread_name).spawn(move || {
            stats.add_worker_count(1);
            let _registration = WorkerRegistration {
                worker_id: worker.id,
                registry,
                stats,
            };
            worker.run();
        });

        if let Err(e) = spawned {
            error!("Runner {} failed to spawn worker {}: {}", self.id, worker_id, e);
            workers.remove(&worker_id);
        }
    }

    /// Scale the pool to the number of scheduled tasks. Never shrinks it.
    pub fn update_num_workers(&self, num_tasks: usize) {
        if self.is_static_worker_count {
            warn!("Attempted to change runner {}'s static worker count, ignoring", self.id);
            return;
        }

        let desired = desired_num_workers(num_tasks, self.max_num_workers);
        self.ensure_min_workers(desired);
    }

    /// Producer handle to the dispatch queue.
    ///
    /// Sending a task whose identity is already running is safe; the worker
    /// that receives it drops it.
    pub fn get_chan(&self) -> TaskSender {
        let inner = match self.sender.read().as_ref() {
            Some(tx) => tx.downgrade(),
            // stopped: hand out a handle to an already closed queue
            None => flume::bounded::<Arc<dyn Task>>(0).0.downgrade(),
        };
        TaskSender { inner }
    }

    /// Attach the membership predicate consulted before recording stats.
    pub fn set_scheduler(&self, scheduler: Weak<dyn ScheduleMembership>) {
        *self.scheduler.write() = Some(scheduler);
    }

    /// True when no scheduler is attached, or the attached one still
    /// considers the task scheduled.
    pub fn should_add_work_stats(&self, id: &TaskId) -> bool {
        membership_allows(&self.scheduler, id)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn workers(&self) -> HashMap<u64, WorkerInfo> {
        self.workers.lock().clone()
    }

    /// Dispatches dropped by workers because the same task was running.
    pub fn skipped_dispatches(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn is_static_worker_count(&self) -> bool {
        self.is_static_worker_count
    }

    pub fn running_tracker(&self) -> &Arc<RunningTracker> {
        &self.tracker
    }
}

/// Deregisters a worker when its thread ends, unwinding included.
struct WorkerRegistration {
    worker_id: u64,
    registry: Arc<Mutex<HashMap<u64, WorkerInfo>>>,
    stats: Arc<dyn StatsSink>,
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.stats.add_worker_count(-1);
        self.registry.lock().remove(&self.worker_id);
    }
}

fn membership_allows(scheduler: &SchedulerLink, id: &TaskId) -> bool {
    match scheduler.read().as_ref().and_then(Weak::upgrade) {
        Some(s) => s.is_scheduled(id),
        None => true,
    }
}

/// Step table from scheduled task count to pool size.
pub(super) fn desired_num_workers(num_tasks: usize, max_num_workers: usize) -> usize {
    match num_tasks {
        0..=10 => 4,
        11..=15 => 10,
        16..=20 => 15,
        21..=25 => 20,
        _ => max_num_workers,
    }
}
