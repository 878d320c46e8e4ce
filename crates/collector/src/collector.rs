//! The narrow interface between the scheduler and the runner.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};
use vigil_core::TaskId;

use crate::error::CollectorError;
use crate::runner::Runner;
use crate::stats::StatsSink;
use crate::task::Task;

/// What the scheduler needs from the execution side.
pub trait Collector: Send + Sync {
    /// Submit a task for execution, returning its identity.
    fn run_check(&self, task: Arc<dyn Task>) -> Result<TaskId, CollectorError>;

    /// Stop a task and forget it.
    fn stop_check(&self, id: &TaskId) -> Result<(), CollectorError>;

    fn stop(&self);
}

/// Whether a task is still considered scheduled. Consulted by workers before
/// recording the stats of a finished run.
pub trait ScheduleMembership: Send + Sync {
    fn is_scheduled(&self, id: &TaskId) -> bool;
}

/// [`Collector`] backed by a [`Runner`].
pub struct RunnerCollector {
    runner: Arc<Runner>,
    stats: Arc<dyn StatsSink>,
    scheduled: RwLock<HashSet<TaskId>>,
}

impl RunnerCollector {
    /// Wrap `runner` and register as its schedule membership predicate.
    pub fn new(runner: Arc<Runner>, stats: Arc<dyn StatsSink>) -> Arc<Self> {
        let collector = Arc::new(Self {
            runner,
            stats,
            scheduled: RwLock::new(HashSet::new()),
        });
        let weak = Arc::downgrade(&collector);
        let membership: Weak<dyn ScheduleMembership> = weak;
        collector.runner.set_scheduler(membership);
        collector
    }

    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.read().len()
    }
}

impl Collector for RunnerCollector {
    fn run_check(&self, task: Arc<dyn Task>) -> Result<TaskId, CollectorError> {
        if !self.runner.is_running() {
            return Err(CollectorError::RunnerStopped);
        }

        let id = task.id().clone();
        let num_scheduled = {
            let mut scheduled = self.scheduled.write();
            if !scheduled.insert(id.clone()) {
                return Err(CollectorError::AlreadyScheduled(id));
            }
            scheduled.len()
        };

        if !self.runner.is_static_worker_count() {
            self.runner.update_num_workers(num_scheduled);
        }
        if task.is_one_shot() {
            // its worker retires after the run
            self.runner.add_worker();
        }

        if let Err(e) = self.runner.get_chan().send(task) {
            self.scheduled.write().remove(&id);
            return Err(e);
        }

        debug!("Task {} submitted to runner {}", id, self.runner.id());
        Ok(id)
    }

    fn stop_check(&self, id: &TaskId) -> Result<(), CollectorError> {
        // a trailing run must not record stats any more
        self.scheduled.write().remove(id);

        self.runner.stop_check(id)?;
        self.stats.remove_task_stats(id);
        Ok(())
    }

    fn stop(&self) {
        info!("Stopping collector on runner {}", self.runner.id());
        self.runner.stop();
    }
}

impl ScheduleMembership for RunnerCollector {
    fn is_scheduled(&self, id: &TaskId) -> bool {
        self.scheduled.read().contains(id)
    }
}
