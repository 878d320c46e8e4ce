use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::integration::Instance;

/// Stable identity of a task instance, formatted `<name>:<16 hex digits>`.
///
/// The hash covers the task name, the instance block and the init config,
/// so the same instance loaded twice yields the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the identity for one instance of a task config.
    pub fn for_instance(name: &str, instance: &Instance, init_config: &Instance) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(instance.to_string().as_bytes());
        hasher.update(init_config.to_string().as_bytes());
        let digest = hasher.finalize();
        let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("{name}:{short}"))
    }

    /// Task name part of the identity (everything before the first `:`).
    pub fn name(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identity_is_stable_per_instance() {
        let a = TaskId::for_instance("disk", &json!({"path": "/"}), &json!({}));
        let b = TaskId::for_instance("disk", &json!({"path": "/"}), &json!({}));
        let c = TaskId::for_instance("disk", &json!({"path": "/var"}), &json!({}));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.name(), "disk");
        assert_eq!(a.as_str().len(), "disk:".len() + 16);
    }

    #[test]
    fn name_without_hash() {
        let id = TaskId::from("uptime");
        assert_eq!(id.name(), "uptime");
        assert_eq!(id.to_string(), "uptime");
    }
}
