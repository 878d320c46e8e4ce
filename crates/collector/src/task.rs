use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::{Instance, TaskConfig, TaskId};

/// Samples a task handed to its sender during its last run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderStats {
    pub metric_samples: u64,
    pub events: u64,
    pub service_checks: u64,
}

/// A unit of recurring or one-shot work the runner can execute.
///
/// Tasks are shared between the scheduler, the dispatch queue and the worker
/// running them, so every method takes `&self`; implementations keep their
/// mutable state behind their own locks.
pub trait Task: Send + Sync {
    /// Stable identity, unique per config instance.
    fn id(&self) -> &TaskId;

    /// Task family name, for logging and stats.
    fn name(&self) -> &str;

    /// Run once, synchronously.
    fn run(&self) -> anyhow::Result<()>;

    /// Ask an in-progress `run` to return. Must not block on the run itself.
    fn stop(&self);

    /// Collection cadence. Zero marks a one-shot task.
    fn interval(&self) -> Duration;

    /// Drain the non-fatal warnings accumulated during the last run.
    fn warnings(&self) -> Vec<anyhow::Error>;

    fn sender_stats(&self) -> SenderStats {
        SenderStats::default()
    }

    fn is_one_shot(&self) -> bool {
        self.interval().is_zero()
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", self.id())
            .field("interval", &self.interval())
            .finish()
    }
}

/// Materializes a task from one instance block of a config.
pub trait Loader: Send + Sync {
    /// Loader name, used in diagnostics.
    fn name(&self) -> &str;

    fn load(&self, config: &TaskConfig, instance: &Instance) -> anyhow::Result<Arc<dyn Task>>;
}
