use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info};
use vigil_core::TaskId;

use crate::stats::{HealthStatus, StatsSink};
use crate::task::Task;

use super::tracker::RunningTracker;

/// Runs logged unconditionally before the logging frequency kicks in.
const FIRST_RUN_SERIES: u64 = 5;

pub(super) type ShouldAddWorkStats = Box<dyn Fn(&TaskId) -> bool + Send>;

/// One execution loop over the shared dispatch queue.
pub struct Worker {
    pub id: u64,
    pub runner_id: u64,
    pub(super) tasks: flume::Receiver<Arc<dyn Task>>,
    pub(super) tracker: Arc<RunningTracker>,
    pub(super) stats: Arc<dyn StatsSink>,
    pub(super) should_add_work_stats: ShouldAddWorkStats,
    pub(super) logging_frequency: u64,
    /// Dispatches dropped because the task was already running.
    pub(super) skipped: Arc<AtomicU64>,
}

impl Worker {
    /// Process tasks until the queue closes, or until a one-shot task has run.
    pub fn run(&self) {
        debug!("Runner {}, worker {}: ready to process tasks", self.runner_id, self.id);

        while let Ok(task) = self.tasks.recv() {
            if !self.tracker.add_check(&task) {
                debug!("Task {} is already running, skip execution", task.id());
                self.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.process(task.as_ref());

            if task.is_one_shot() {
                info!("Task {} one-time execution has finished", task.id());
                return;
            }
        }

        debug!("Runner {}, worker {}: finished processing tasks", self.runner_id, self.id);
    }

    fn process(&self, task: &dyn Task) {
        let id = task.id();
        self.stats.add_running_check_count(1);

        let (do_log, last_log) = self.should_log(id);
        if do_log {
            info!(task = %id, "Running task");
        } else {
            debug!(task = %id, "Running task");
        }

        let started = Instant::now();
        self.stats.set_running_stats(id, Utc::now());
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run())).unwrap_or_else(|payload| {
            Err(anyhow::anyhow!("task panicked: {}", panic_message(&*payload)))
        });
        self.stats.delete_running_stats(id);

        let warnings = task.warnings();
        let err = result.err();

        if !warnings.is_empty() {
            self.stats.add_warnings_count(warnings.len() as i64);
        }
        if let Some(e) = &err {
            error!("Error running task {}: {:#}", id, e);
            self.stats.add_errors_count(1);
        }

        if !task.is_one_shot() {
            let status = HealthStatus::from_run(err.is_some(), warnings.len());
            self.stats.service_check(task, status);
        }

        self.tracker.delete_check(id);

        self.stats.add_running_check_count(-1);
        self.stats.add_runs_count(1);

        let noteworthy = !task.is_one_shot() || !warnings.is_empty() || err.is_some();
        if noteworthy && (self.should_add_work_stats)(id) {
            self.stats.add_work_stats(
                task,
                started.elapsed(),
                err.as_ref(),
                &warnings,
                task.sender_stats(),
            );
        }

        if do_log {
            if last_log {
                info!(
                    task = %id,
                    "Done running task, next runs will be logged every {} runs",
                    self.logging_frequency
                );
            } else {
                info!(task = %id, "Done running task");
            }
        } else {
            debug!(task = %id, "Done running task");
        }
    }

    /// Whether this run is logged at info level, and whether it is the last
    /// run of the initial always-logged series.
    pub(super) fn should_log(&self, id: &TaskId) -> (bool, bool) {
        let Some(total_runs) = self.stats.total_runs(id) else {
            return (true, false);
        };
        let frequency = self.logging_frequency.max(1);
        let do_log = total_runs <= FIRST_RUN_SERIES || total_runs % frequency == 0;
        (do_log, total_runs == FIRST_RUN_SERIES)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::runner::test_util::{RunMode, TestTask};
    use crate::stats::RunnerStats;
    use crate::task::SenderStats;

    fn worker(stats: Arc<RunnerStats>, scheduled: bool) -> (Worker, flume::Sender<Arc<dyn Task>>) {
        let (tx, rx) = flume::unbounded();
        let worker = Worker {
            id: 1,
            runner_id: 1,
            tasks: rx,
            tracker: Arc::new(RunningTracker::new()),
            stats,
            should_add_work_stats: Box::new(move |_| scheduled),
            logging_frequency: 10,
            skipped: Arc::new(AtomicU64::new(0)),
        };
        (worker, tx)
    }

    #[test]
    fn recurring_run_records_stats_and_health() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let task = Arc::new(TestTask::recurring("disk:1").warning("slow"));
        let id = task.id().clone();

        tx.send(task.clone()).unwrap();
        tx.send(task.clone()).unwrap();
        drop(tx);
        worker.run();

        assert_eq!(task.run_count(), 2);
        assert!(worker.tracker.is_empty());
        assert_eq!(stats.runs_count(), 2);
        assert_eq!(stats.running_check_count(), 0);
        assert_eq!(stats.warnings_count(), 2);
        assert_eq!(stats.errors_count(), 0);
        assert_eq!(stats.health(&id), Some(HealthStatus::Warning));
        assert!(stats.running_since(&id).is_none());

        let s = stats.task_stats(&id).unwrap();
        assert_eq!(s.total_runs, 2);
        assert_eq!(s.sender_stats, SenderStats { metric_samples: 2, ..Default::default() });
    }

    #[test]
    fn failing_run_is_critical_and_does_not_stop_the_loop() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let bad = Arc::new(TestTask::recurring("disk:1").failing());
        let good = Arc::new(TestTask::recurring("cpu:1"));

        tx.send(bad.clone()).unwrap();
        tx.send(good.clone()).unwrap();
        drop(tx);
        worker.run();

        assert_eq!(good.run_count(), 1);
        assert_eq!(stats.errors_count(), 1);
        assert_eq!(stats.health(bad.id()), Some(HealthStatus::Critical));
        assert_eq!(stats.health(good.id()), Some(HealthStatus::Ok));
        assert_eq!(stats.task_stats(bad.id()).unwrap().total_errors, 1);
    }

    #[test]
    fn unscheduled_task_leaves_no_stats() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), false);
        let task = Arc::new(TestTask::recurring("disk:1").failing());

        tx.send(task.clone()).unwrap();
        drop(tx);
        worker.run();

        assert_eq!(task.run_count(), 1);
        assert!(stats.task_stats(task.id()).is_none());
        // counters and health are still reported
        assert_eq!(stats.runs_count(), 1);
        assert_eq!(stats.health(task.id()), Some(HealthStatus::Critical));
    }

    #[test]
    fn one_shot_retires_the_worker() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let once = Arc::new(TestTask::one_shot("inventory:1"));
        let next = Arc::new(TestTask::recurring("disk:1"));

        tx.send(once.clone()).unwrap();
        tx.send(next.clone()).unwrap();
        worker.run();

        assert_eq!(once.run_count(), 1);
        assert_eq!(next.run_count(), 0);
        assert_eq!(worker.tasks.len(), 1);
        // clean one-shot runs emit no health signal and no task stats
        assert!(stats.health(once.id()).is_none());
        assert!(stats.task_stats(once.id()).is_none());
    }

    #[test]
    fn one_shot_with_error_keeps_stats() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let once = Arc::new(TestTask::one_shot("inventory:1").failing());

        tx.send(once.clone()).unwrap();
        worker.run();

        assert!(stats.health(once.id()).is_none());
        assert_eq!(stats.task_stats(once.id()).unwrap().total_errors, 1);
    }

    #[test]
    fn panicking_run_is_an_error_and_releases_the_task() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let bad = Arc::new(TestTask::recurring("disk:1").mode(RunMode::Panic));
        let good = Arc::new(TestTask::recurring("disk:1"));

        tx.send(bad.clone()).unwrap();
        tx.send(good.clone()).unwrap();
        drop(tx);
        worker.run();

        assert_eq!(good.run_count(), 1);
        assert_eq!(worker.skipped.load(Ordering::Relaxed), 0);
        assert!(worker.tracker.is_empty());
        assert_eq!(stats.running_check_count(), 0);
        assert_eq!(stats.runs_count(), 2);
        assert_eq!(stats.errors_count(), 1);
        assert!(stats.running_since(good.id()).is_none());
        assert_eq!(stats.task_stats(good.id()).unwrap().total_errors, 1);
    }

    #[test]
    fn duplicate_dispatch_is_skipped() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(Arc::clone(&stats), true);
        let running = Arc::new(TestTask::recurring("disk:1"));
        let duplicate = Arc::new(TestTask::recurring("disk:1"));

        // simulate another worker inside run()
        let held: Arc<dyn Task> = running.clone();
        worker.tracker.add_check(&held);
        tx.send(duplicate.clone()).unwrap();
        drop(tx);
        worker.run();

        assert_eq!(duplicate.run_count(), 0);
        assert_eq!(stats.runs_count(), 0);
        assert_eq!(worker.skipped.load(Ordering::Relaxed), 1);
        assert!(worker.tracker.check(running.id()).is_some());
    }

    #[test]
    fn logging_cadence() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, _tx) = worker(Arc::clone(&stats), true);
        let task = TestTask::recurring("disk:1");
        let id = task.id().clone();

        assert_eq!(worker.should_log(&id), (true, false));

        let mut seen = Vec::new();
        for _ in 0..20 {
            stats.add_work_stats(&task, Duration::from_millis(1), None, &[], SenderStats::default());
            seen.push(worker.should_log(&id));
        }

        // total_runs 1..=5 logged, 5 is the transition
        assert!(seen[..4].iter().all(|&l| l == (true, false)));
        assert_eq!(seen[4], (true, true));
        // then every 10th run
        assert_eq!(seen[5], (false, false));
        assert_eq!(seen[9], (true, false));
        assert_eq!(seen[10], (false, false));
        assert_eq!(seen[19], (true, false));
    }

    #[test]
    fn zero_logging_frequency_logs_every_run() {
        let stats = Arc::new(RunnerStats::new());
        let (mut worker, _tx) = worker(Arc::clone(&stats), true);
        worker.logging_frequency = 0;
        let task = TestTask::recurring("disk:1");
        for _ in 0..7 {
            stats.add_work_stats(&task, Duration::from_millis(1), None, &[], SenderStats::default());
        }
        assert_eq!(worker.should_log(task.id()), (true, false));
    }

    #[test]
    fn stopped_queue_ends_the_loop() {
        let stats = Arc::new(RunnerStats::new());
        let (worker, tx) = worker(stats, true);
        drop(tx);
        worker.run();
    }
}
