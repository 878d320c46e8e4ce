//! Concurrent execution core of the vigil agent.
//!
//! Task configurations are turned into [`Task`]s by the [`TaskScheduler`],
//! handed to a [`Collector`], and executed by the [`Runner`]'s worker pool.
//! A task identity never runs twice at the same time, and stopping is always
//! cooperative and time-bounded.

pub mod collector;
pub mod error;
pub mod loaders;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use collector::{Collector, RunnerCollector, ScheduleMembership};
pub use error::CollectorError;
pub use runner::{Runner, RunningTracker, TaskSender, Worker};
pub use scheduler::{ErrorStats, TaskScheduler};
pub use stats::{HealthStatus, RunnerStats, RunnerStatsSnapshot, StatsSink, TaskStats};
pub use task::{Loader, SenderStats, Task};

pub use vigil_core::{AgentConfig, FilterKind, Instance, TaskConfig, TaskId};
