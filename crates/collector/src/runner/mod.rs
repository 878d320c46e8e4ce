//! Task runner -- worker pool, dispatch queue and running-task registry.
//!
//! Split into focused submodules:
//! - `core`: Runner struct, worker pool management, dispatch handle
//! - `shutdown`: per-task stop requests and global shutdown
//! - `tracker`: registry of the tasks currently executing
//! - `worker`: the loop executing tasks off the dispatch queue
//!
//! The dispatch queue is a rendezvous channel: a send blocks until a worker
//! is ready to receive. That is the only backpressure in the system.
//!
//! A worker that runs a one-shot task (zero interval) exits afterwards, so
//! every one-shot dispatch permanently removes one worker from the pool.
//! Callers dispatching one-shot tasks must add a worker for each of them
//! (the [`RunnerCollector`](crate::collector::RunnerCollector) does).

use std::time::Duration;

mod core;
mod shutdown;
pub mod tracker;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::core::{Runner, TaskSender, WorkerInfo};
pub use self::tracker::{LockedTracker, RunningTracker, RunningTasks};
pub use self::worker::Worker;

/// How long to wait for a single task's `stop()`.
pub const STOP_CHECK_TIMEOUT: Duration = Duration::from_millis(500);
/// How long shutdown waits for all running tasks together.
pub const STOP_ALL_CHECKS_TIMEOUT: Duration = Duration::from_secs(2);
