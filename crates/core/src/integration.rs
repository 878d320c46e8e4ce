//! Declarative task configurations.
//!
//! A [`TaskConfig`] describes one or more instances of a task family. The
//! collector turns every instance into a running task through its loaders and
//! uses [`TaskConfig::digest`] to remember which tasks came from which config.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// A raw instance (or init config) block. Loaders decide what it means.
pub type Instance = serde_json::Value;

/// Exclusion filters a config can be subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    Metrics,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default = "empty_block")]
    pub init_config: Instance,
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// Cluster-level configs are dispatched elsewhere and never run locally.
    #[serde(default)]
    pub cluster_check: bool,
    #[serde(default)]
    pub metrics_excluded: bool,
    #[serde(default)]
    pub logs_excluded: bool,
    /// Where the config came from (file path, provider name...).
    #[serde(default)]
    pub source: String,
}

fn empty_block() -> Instance {
    Instance::Object(Default::default())
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            name: name.into(),
            init_config: empty_block(),
            instances,
            cluster_check: false,
            metrics_excluded: false,
            logs_excluded: false,
            source: String::new(),
        }
    }

    /// Stable content hash of the config, used as a lookup key.
    ///
    /// Only the fields that define which tasks get built take part in it.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.init_config.to_string().as_bytes());
        for instance in &self.instances {
            hasher.update(instance.to_string().as_bytes());
        }
        hasher.update([self.cluster_check as u8]);
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether this config describes locally scheduled tasks.
    pub fn is_task_config(&self) -> bool {
        !self.cluster_check && !self.instances.is_empty()
    }

    pub fn has_filter(&self, kind: FilterKind) -> bool {
        match kind {
            FilterKind::Metrics => self.metrics_excluded,
            FilterKind::Logs => self.logs_excluded,
        }
    }
}

/// A TOML file holding a list of task configs under `[[tasks]]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfigFile {
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl TaskConfigFile {
    /// Parse task configs from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let file: Self = toml::from_str(toml_str)?;
        file.validate()?;
        Ok(file)
    }

    /// Load task configs from a file path. Every config gets the path as its source.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut file = Self::from_toml(&content)?;
        let source = path.as_ref().display().to_string();
        for task in &mut file.tasks {
            if task.source.is_empty() {
                task.source = source.clone();
            }
        }
        Ok(file)
    }

    fn validate(&self) -> Result<(), CoreError> {
        for (idx, task) in self.tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(CoreError::Invalid(format!("task #{idx} has no name")));
            }
            if task.name.contains(':') {
                return Err(CoreError::Invalid(format!(
                    "task name '{}' must not contain ':'",
                    task.name
                )));
            }
        }
        Ok(())
    }
}
