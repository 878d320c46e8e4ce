use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::Serialize;
use vigil_core::TaskId;

/// Diagnostics side table for the scheduler.
#[derive(Debug, Default)]
pub struct ErrorStats {
    /// Config name -> loader name -> last error.
    loader: RwLock<HashMap<String, HashMap<String, String>>>,
    /// Task id -> last submit or stop error.
    run: RwLock<HashMap<TaskId, String>>,
}

/// Serializable view of [`ErrorStats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatsSnapshot {
    pub loader_errors: BTreeMap<String, BTreeMap<String, String>>,
    pub run_errors: BTreeMap<TaskId, String>,
}

impl ErrorStats {
    pub fn set_loader_error(&self, config_name: &str, loader_name: &str, message: String) {
        self.loader
            .write()
            .entry(config_name.to_string())
            .or_default()
            .insert(loader_name.to_string(), message);
    }

    pub fn remove_loader_errors(&self, config_name: &str) {
        self.loader.write().remove(config_name);
    }

    pub fn loader_errors(&self) -> HashMap<String, HashMap<String, String>> {
        self.loader.read().clone()
    }

    pub fn set_run_error(&self, id: &TaskId, message: String) {
        self.run.write().insert(id.clone(), message);
    }

    pub fn run_errors(&self) -> HashMap<TaskId, String> {
        self.run.read().clone()
    }

    pub fn snapshot(&self) -> ErrorStatsSnapshot {
        ErrorStatsSnapshot {
            loader_errors: self
                .loader
                .read()
                .iter()
                .map(|(config, errs)| {
                    let errs = errs.iter().map(|(l, e)| (l.clone(), e.clone())).collect();
                    (config.clone(), errs)
                })
                .collect(),
            run_errors: self.run.read().iter().map(|(id, e)| (id.clone(), e.clone())).collect(),
        }
    }
}
