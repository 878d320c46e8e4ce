use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, keeping `default` when unset or malformed.
fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Worker count a dynamic runner starts with.
pub const DEFAULT_NUM_WORKERS: usize = 4;
/// Upper bound of the dynamic worker step table.
pub const MAX_NUM_WORKERS: usize = 25;
/// Every Nth run of a task is logged at info level once its first runs are past.
pub const DEFAULT_LOGGING_FREQUENCY: u64 = 500;

// ── Agent config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Fixed number of task runners. 0 = size the pool dynamically.
    pub check_runners: usize,
    /// Pool size a dynamic runner starts with.
    pub default_num_workers: usize,
    /// Pool size used once the scheduled task count exceeds the step table.
    pub max_num_workers: usize,
    pub logging_frequency: u64,
    /// TOML file holding the task configurations.
    pub tasks_file: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            check_runners: 0,
            default_num_workers: DEFAULT_NUM_WORKERS,
            max_num_workers: MAX_NUM_WORKERS,
            logging_frequency: DEFAULT_LOGGING_FREQUENCY,
            tasks_file: PathBuf::from("config/tasks.toml"),
        }
    }
}

impl AgentConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE`; when set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VIGIL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();
        Self {
            profile: p.to_string(),
            check_runners: profiled_env_parse(p, "VIGIL_CHECK_RUNNERS", defaults.check_runners),
            default_num_workers: profiled_env_parse(
                p,
                "VIGIL_DEFAULT_WORKERS",
                defaults.default_num_workers,
            ),
            max_num_workers: profiled_env_parse(p, "VIGIL_MAX_WORKERS", defaults.max_num_workers),
            logging_frequency: profiled_env_parse(
                p,
                "VIGIL_LOGGING_FREQUENCY",
                defaults.logging_frequency,
            ),
            tasks_file: PathBuf::from(profiled_env_or(p, "VIGIL_TASKS_FILE", "config/tasks.toml")),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Whether the runner pool size is pinned by `check_runners`.
    pub fn is_static_worker_count(&self) -> bool {
        self.check_runners != 0
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        if self.is_static_worker_count() {
            tracing::info!("  runners:     static, {} workers", self.check_runners);
        } else {
            tracing::info!(
                "  runners:     dynamic, {} -> {} workers",
                self.default_num_workers,
                self.max_num_workers
            );
        }
        tracing::info!("  logging:     every {} runs", self.logging_frequency);
        tracing::info!("  tasks:       {}", self.tasks_file.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_dynamic() {
        let config = AgentConfig::default();
        assert!(!config.is_static_worker_count());
        assert_eq!(config.default_num_workers, 4);
        assert_eq!(config.max_num_workers, 25);
        assert_eq!(config.logging_frequency, 500);
        assert_eq!(config.profile_label(), "default");
    }

    #[test]
    fn profile_prefix_wins() {
        env::set_var("VIGILTEST_VIGIL_CHECK_RUNNERS", "7");
        env::set_var("VIGIL_LOGGING_FREQUENCY", "not-a-number");

        let config = AgentConfig::for_profile("vigiltest");
        assert_eq!(config.profile, "VIGILTEST");
        assert_eq!(config.check_runners, 7);
        assert!(config.is_static_worker_count());
        assert_eq!(config.logging_frequency, DEFAULT_LOGGING_FREQUENCY);

        env::remove_var("VIGILTEST_VIGIL_CHECK_RUNNERS");
        env::remove_var("VIGIL_LOGGING_FREQUENCY");
    }
}
