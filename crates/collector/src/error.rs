//! Collector error types.

use std::time::Duration;

use thiserror::Error;
use vigil_core::TaskId;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("unable to load any task from config '{config}': {}", errors.join("; "))]
    NoTasksLoaded { config: String, errors: Vec<String> },

    #[error("timeout after {timeout:?} during stop operation on task {id}")]
    StopTimeout { id: TaskId, timeout: Duration },

    #[error("stop operation on task {0} did not complete")]
    StopFailed(TaskId),

    #[error("runner is stopped, not accepting tasks")]
    RunnerStopped,

    #[error("a task with ID {0} is already scheduled")]
    AlreadyScheduled(TaskId),
}
