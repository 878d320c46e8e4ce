//! Execution statistics reported by the workers.
//!
//! The runner only talks to the [`StatsSink`] trait. [`RunnerStats`] is the
//! in-memory implementation backing the agent's status output.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{trace, warn};
use vigil_core::TaskId;

use crate::task::{SenderStats, Task};

/// Synthetic health of a recurring task's last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    /// An error outranks warnings.
    pub fn from_run(failed: bool, warning_count: usize) -> Self {
        if failed {
            HealthStatus::Critical
        } else if warning_count > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        }
    }
}

/// Sink for everything the workers report about task executions.
pub trait StatsSink: Send + Sync {
    fn add_work_stats(
        &self,
        task: &dyn Task,
        duration: Duration,
        error: Option<&anyhow::Error>,
        warnings: &[anyhow::Error],
        sender_stats: SenderStats,
    );
    fn set_running_stats(&self, id: &TaskId, started_at: DateTime<Utc>);
    fn delete_running_stats(&self, id: &TaskId);
    fn service_check(&self, task: &dyn Task, status: HealthStatus);
    fn remove_task_stats(&self, id: &TaskId);

    /// Number of recorded runs, `None` when the task has no stats yet.
    fn total_runs(&self, id: &TaskId) -> Option<u64>;

    fn add_running_check_count(&self, delta: i64);
    fn add_runs_count(&self, delta: i64);
    fn add_warnings_count(&self, delta: i64);
    fn add_errors_count(&self, delta: i64);
    fn add_worker_count(&self, delta: i64);
}

// ── Per-task stats ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub id: TaskId,
    pub name: String,
    pub interval: Duration,
    pub total_runs: u64,
    pub total_errors: u64,
    pub total_warnings: u64,
    pub last_execution_time: Duration,
    pub average_execution_time: Duration,
    pub last_error: Option<String>,
    pub last_warnings: Vec<String>,
    pub sender_stats: SenderStats,
    pub updated_at: DateTime<Utc>,
}

impl TaskStats {
    pub fn new(task: &dyn Task) -> Self {
        Self {
            id: task.id().clone(),
            name: task.name().to_string(),
            interval: task.interval(),
            total_runs: 0,
            total_errors: 0,
            total_warnings: 0,
            last_execution_time: Duration::ZERO,
            average_execution_time: Duration::ZERO,
            last_error: None,
            last_warnings: Vec::new(),
            sender_stats: SenderStats::default(),
            updated_at: Utc::now(),
        }
    }

    /// Record one run.
    pub fn add(
        &mut self,
        duration: Duration,
        error: Option<&anyhow::Error>,
        warnings: &[anyhow::Error],
        sender_stats: SenderStats,
    ) {
        self.total_runs += 1;
        self.last_execution_time = duration;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.average_execution_time = if self.total_runs == 1 {
            duration
        } else {
            let prev_nanos = self.average_execution_time.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.total_runs as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        match error {
            Some(e) => {
                self.total_errors += 1;
                self.last_error = Some(format!("{e:#}"));
            }
            None => self.last_error = None,
        }

        self.total_warnings += warnings.len() as u64;
        self.last_warnings = warnings.iter().map(|w| format!("{w:#}")).collect();

        self.sender_stats.metric_samples += sender_stats.metric_samples;
        self.sender_stats.events += sender_stats.events;
        self.sender_stats.service_checks += sender_stats.service_checks;
        self.updated_at = Utc::now();
    }
}

// ── RunnerStats ──────────────────────────────────────────────────────

/// In-memory [`StatsSink`]: counters, running start times, per-task stats and
/// the last health status of every recurring task.
#[derive(Debug, Default)]
pub struct RunnerStats {
    workers: AtomicI64,
    running_checks: AtomicI64,
    runs: AtomicI64,
    warnings: AtomicI64,
    errors: AtomicI64,
    running: RwLock<HashMap<TaskId, DateTime<Utc>>>,
    /// Task name -> task id -> stats.
    tasks: RwLock<HashMap<String, HashMap<TaskId, TaskStats>>>,
    health: RwLock<HashMap<TaskId, HealthStatus>>,
}

/// Serializable view of [`RunnerStats`].
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatsSnapshot {
    pub workers: i64,
    pub running_checks: i64,
    pub runs: i64,
    pub warnings: i64,
    pub errors: i64,
    pub running: BTreeMap<TaskId, DateTime<Utc>>,
    pub checks: BTreeMap<String, BTreeMap<TaskId, TaskStats>>,
    pub health: BTreeMap<TaskId, HealthStatus>,
}

impl RunnerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_stats(&self, id: &TaskId) -> Option<TaskStats> {
        self.tasks
            .read()
            .get(id.name())
            .and_then(|stats| stats.get(id))
            .cloned()
    }

    pub fn health(&self, id: &TaskId) -> Option<HealthStatus> {
        self.health.read().get(id).copied()
    }

    pub fn running_since(&self, id: &TaskId) -> Option<DateTime<Utc>> {
        self.running.read().get(id).copied()
    }

    pub fn worker_count(&self) -> i64 {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn running_check_count(&self) -> i64 {
        self.running_checks.load(Ordering::Relaxed)
    }

    pub fn runs_count(&self) -> i64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn warnings_count(&self) -> i64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> i64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunnerStatsSnapshot {
        let checks = self
            .tasks
            .read()
            .iter()
            .map(|(name, stats)| {
                let inner = stats.iter().map(|(id, s)| (id.clone(), s.clone())).collect();
                (name.clone(), inner)
            })
            .collect();

        RunnerStatsSnapshot {
            workers: self.worker_count(),
            running_checks: self.running_check_count(),
            runs: self.runs_count(),
            warnings: self.warnings_count(),
            errors: self.errors_count(),
            running: self.running.read().iter().map(|(k, v)| (k.clone(), *v)).collect(),
            checks,
            health: self.health.read().iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

impl StatsSink for RunnerStats {
    fn add_work_stats(
        &self,
        task: &dyn Task,
        duration: Duration,
        error: Option<&anyhow::Error>,
        warnings: &[anyhow::Error],
        sender_stats: SenderStats,
    ) {
        trace!("Add stats for {}", task.id());
        let mut tasks = self.tasks.write();
        tasks
            .entry(task.name().to_string())
            .or_default()
            .entry(task.id().clone())
            .or_insert_with(|| TaskStats::new(task))
            .add(duration, error, warnings, sender_stats);
    }

    fn set_running_stats(&self, id: &TaskId, started_at: DateTime<Utc>) {
        self.running.write().insert(id.clone(), started_at);
    }

    fn delete_running_stats(&self, id: &TaskId) {
        self.running.write().remove(id);
    }

    fn service_check(&self, task: &dyn Task, status: HealthStatus) {
        self.health.write().insert(task.id().clone(), status);
    }

    fn remove_task_stats(&self, id: &TaskId) {
        let mut tasks = self.tasks.write();
        let Some(stats) = tasks.get_mut(id.name()) else {
            warn!("Stats for task {} not found", id);
            return;
        };
        stats.remove(id);
        if stats.is_empty() {
            tasks.remove(id.name());
        }
        self.health.write().remove(id);
    }

    fn total_runs(&self, id: &TaskId) -> Option<u64> {
        self.tasks
            .read()
            .get(id.name())
            .and_then(|stats| stats.get(id))
            .map(|s| s.total_runs)
    }

    fn add_running_check_count(&self, delta: i64) {
        self.running_checks.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_runs_count(&self, delta: i64) {
        self.runs.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_warnings_count(&self, delta: i64) {
        self.warnings.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_errors_count(&self, delta: i64) {
        self.errors.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_worker_count(&self, delta: i64) {
        self.workers.fetch_add(delta, Ordering::Relaxed);
    }
}
