//! Task scheduler -- turns task configurations into running tasks.
//!
//! Each instance block of a config is handed to the registered loaders in
//! order; the first loader that succeeds produces the task. Loaded tasks are
//! submitted through a [`Collector`](crate::collector::Collector), and the
//! identities of the submitted tasks are remembered per config digest so the
//! same config can later be unscheduled.

mod core;
pub mod errors;

pub use self::core::TaskScheduler;
pub use self::errors::{ErrorStats, ErrorStatsSnapshot};
