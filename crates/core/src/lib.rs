pub mod config;
pub mod error;
pub mod id;
pub mod integration;

pub use config::AgentConfig;
pub use error::*;
pub use id::TaskId;
pub use integration::{FilterKind, Instance, TaskConfig, TaskConfigFile};
