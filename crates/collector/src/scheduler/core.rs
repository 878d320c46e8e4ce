use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use vigil_core::{FilterKind, TaskConfig, TaskId};

use crate::collector::Collector;
use crate::error::CollectorError;
use crate::task::{Loader, Task};

use super::errors::ErrorStats;

#[derive(Default)]
pub(super) struct SchedulerState {
    /// Config digest -> ids of the tasks submitted from it.
    pub(super) config_to_tasks: HashMap<String, Vec<TaskId>>,
    pub(super) loaders: Vec<Arc<dyn Loader>>,
}

/// Schedules and unschedules task configurations.
///
/// Every operation holds the state lock for its whole duration, loader calls
/// and submissions included.
pub struct TaskScheduler {
    pub(super) state: RwLock<SchedulerState>,
    pub(super) collector: Arc<dyn Collector>,
    pub(super) errors: ErrorStats,
}

impl TaskScheduler {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self {
            state: RwLock::new(SchedulerState::default()),
            collector,
            errors: ErrorStats::default(),
        }
    }

    /// Register a loader. Adding the same loader twice is a no-op.
    pub fn add_loader(&self, loader: Arc<dyn Loader>) {
        let mut state = self.state.write();
        if state.loaders.iter().any(|l| same_loader(l, &loader)) {
            warn!("Loader {} was already added, skipping...", loader.name());
            return;
        }
        debug!("Added loader {} to the task scheduler", loader.name());
        state.loaders.push(loader);
    }

    /// Load and submit the tasks of every config. Returns the ids that were
    /// submitted successfully; failures are recorded in [`run_errors`](Self::run_errors).
    pub fn schedule(&self, configs: &[TaskConfig]) -> Vec<TaskId> {
        let mut state = self.state.write();
        let mut submitted = Vec::new();

        for config in configs {
            if !should_load(config) {
                continue;
            }
            let tasks = match self.load_tasks(&state.loaders, config) {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!("Unable to load the task: {}", e);
                    continue;
                }
            };

            let digest = config.digest();
            for task in tasks {
                let id = task.id().clone();
                match self.collector.run_check(task) {
                    Ok(id) => {
                        info!("Scheduled task {}", id);
                        let ids = state.config_to_tasks.entry(digest.clone()).or_default();
                        // a task left dangling by a failed unschedule is already listed
                        if !ids.contains(&id) {
                            ids.push(id.clone());
                        }
                        submitted.push(id);
                    }
                    Err(e) => {
                        error!("Unable to run task {}: {}", id, e);
                        self.errors.set_run_error(&id, e.to_string());
                    }
                }
            }
        }

        submitted
    }

    /// Stop every task scheduled from these configs.
    ///
    /// A config's entry is dropped once all its tasks stopped; tasks that
    /// failed to stop stay recorded and are retried on the next call.
    pub fn unschedule(&self, configs: &[TaskConfig]) {
        let mut state = self.state.write();

        for config in configs {
            if !config.is_task_config() || config.has_filter(FilterKind::Metrics) {
                continue;
            }

            let digest = config.digest();
            let Some(ids) = state.config_to_tasks.get(&digest).cloned() else {
                debug!("No tasks scheduled for config '{}'", config.name);
                continue;
            };

            let mut dangling = Vec::new();
            for id in ids {
                info!("Unscheduling task {}", id);
                if let Err(e) = self.collector.stop_check(&id) {
                    error!("Error stopping task {}: {}", id, e);
                    self.errors.set_run_error(&id, e.to_string());
                    dangling.push(id);
                }
            }

            if dangling.is_empty() {
                state.config_to_tasks.remove(&digest);
            } else {
                warn!(
                    "{} task(s) of config '{}' did not stop, keeping them for the next pass",
                    dangling.len(),
                    config.name
                );
                state.config_to_tasks.insert(digest, dangling);
            }
        }
    }

    /// Load the tasks of one config without submitting them.
    pub fn get_tasks(&self, config: &TaskConfig) -> Result<Vec<Arc<dyn Task>>, CollectorError> {
        let state = self.state.write();
        self.load_tasks(&state.loaders, config)
    }

    /// Load the tasks of every eligible config without submitting them.
    pub fn get_tasks_from_configs(&self, configs: &[TaskConfig]) -> Vec<Arc<dyn Task>> {
        let state = self.state.write();
        let mut all = Vec::new();
        for config in configs {
            if !should_load(config) {
                continue;
            }
            match self.load_tasks(&state.loaders, config) {
                Ok(tasks) => all.extend(tasks),
                Err(e) => error!("Unable to load the task: {}", e),
            }
        }
        all
    }

    /// Tasks named `name` (or `"{Name}Check"`) loadable from `configs`.
    pub fn get_tasks_by_name_for_configs(
        &self,
        name: &str,
        configs: &[TaskConfig],
    ) -> Vec<Arc<dyn Task>> {
        let title = format!("{}Check", title_case(name));
        self.get_tasks_from_configs(configs)
            .into_iter()
            .filter(|t| t.name() == name || t.name() == title)
            .collect()
    }

    /// Ids currently recorded for a config digest.
    pub fn scheduled_ids(&self, digest: &str) -> Option<Vec<TaskId>> {
        self.state.read().config_to_tasks.get(digest).cloned()
    }

    pub fn loader_errors(&self) -> HashMap<String, HashMap<String, String>> {
        self.errors.loader_errors()
    }

    pub fn run_errors(&self) -> HashMap<TaskId, String> {
        self.errors.run_errors()
    }

    pub fn error_stats(&self) -> &ErrorStats {
        &self.errors
    }

    /// Stop the underlying collector.
    pub fn stop(&self) {
        self.collector.stop();
    }

    fn load_tasks(
        &self,
        loaders: &[Arc<dyn Loader>],
        config: &TaskConfig,
    ) -> Result<Vec<Arc<dyn Task>>, CollectorError> {
        let mut tasks = Vec::new();
        let mut instance_errors = Vec::new();

        for instance in &config.instances {
            let mut errors = Vec::new();

            for loader in loaders {
                match loader.load(config, instance) {
                    Ok(task) => {
                        debug!("{}: successfully loaded task '{}'", loader.name(), config.name);
                        self.errors.remove_loader_errors(&config.name);
                        tasks.push(task);
                        break;
                    }
                    Err(e) => {
                        self.errors.set_loader_error(&config.name, loader.name(), format!("{e:#}"));
                        errors.push(format!("{}: {:#}", loader.name(), e));
                    }
                }
            }

            if errors.len() == loaders.len() {
                let joined = errors.join("; ");
                debug!("Unable to load a task from instance of config '{}': {}", config.name, joined);
                instance_errors.push(joined);
            }
        }

        if tasks.is_empty() {
            return Err(CollectorError::NoTasksLoaded {
                config: config.name.clone(),
                errors: instance_errors,
            });
        }
        Ok(tasks)
    }
}

fn should_load(config: &TaskConfig) -> bool {
    if !config.is_task_config() {
        if !config.name.is_empty() {
            debug!("Config {} is not a task config, skipping", config.name);
        }
        return false;
    }
    if config.has_filter(FilterKind::Metrics) {
        debug!("Config {} is filtered out for metrics collection, ignoring it", config.name);
        return false;
    }
    true
}

fn same_loader(a: &Arc<dyn Loader>, b: &Arc<dyn Loader>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Uppercase the first letter of every word, `_` counting as part of a word.
pub(super) fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}
