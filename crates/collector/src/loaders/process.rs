//! Tasks that run an external command on every collection.
//!
//! ```toml
//! [[tasks]]
//! name = "uptime"
//! init_config = { min_collection_interval = 30 }
//! instances = [{ command = "uptime" }, { command = "cat", args = ["/proc/loadavg"] }]
//! ```
//!
//! Every stdout line counts as one metric sample, every stderr line becomes a
//! warning, and a non-zero exit status fails the run.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};
use vigil_core::{Instance, TaskConfig, TaskId};

use crate::task::{Loader, SenderStats, Task};

/// Collection interval used when neither the instance nor `init_config` sets one.
pub const DEFAULT_MIN_COLLECTION_INTERVAL: u64 = 15;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct ProcessInstance {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    /// Seconds, overrides `init_config`. 0 runs the command once.
    min_collection_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InitConfig {
    min_collection_interval: Option<u64>,
}

/// Builds a [`ProcessTask`] from any instance block carrying a `command`.
#[derive(Debug, Default)]
pub struct ProcessLoader;

impl ProcessLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for ProcessLoader {
    fn name(&self) -> &str {
        "process"
    }

    fn load(&self, config: &TaskConfig, instance: &Instance) -> anyhow::Result<Arc<dyn Task>> {
        let parsed: ProcessInstance = serde_json::from_value(instance.clone())
            .with_context(|| format!("invalid process instance for '{}'", config.name))?;
        let init: InitConfig = if config.init_config.is_null() {
            InitConfig::default()
        } else {
            serde_json::from_value(config.init_config.clone())
                .with_context(|| format!("invalid init_config for '{}'", config.name))?
        };

        let interval = parsed
            .min_collection_interval
            .or(init.min_collection_interval)
            .unwrap_or(DEFAULT_MIN_COLLECTION_INTERVAL);

        Ok(Arc::new(ProcessTask {
            id: TaskId::for_instance(&config.name, instance, &config.init_config),
            command: parsed.command,
            args: parsed.args,
            interval: Duration::from_secs(interval),
            stop_requested: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
            sender_stats: Mutex::new(SenderStats::default()),
        }))
    }
}

pub struct ProcessTask {
    id: TaskId,
    command: String,
    args: Vec<String>,
    interval: Duration,
    /// Sticky: once stopped, later runs return without spawning.
    stop_requested: AtomicBool,
    warnings: Mutex<Vec<anyhow::Error>>,
    sender_stats: Mutex<SenderStats>,
}

impl ProcessTask {
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Wait for the child, killing it if a stop is requested meanwhile.
    /// Returns `None` when the child was killed.
    fn wait(&self, child: &mut Child) -> anyhow::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!("Killing '{}' for task {}", self.command_line(), self.id);
                child.kill()?;
                child.wait()?;
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read a pipe to its end on a separate thread. Invalid UTF-8 is replaced
/// rather than dropping the output.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut out = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut out) {
                warn!("Failed to read process output: {}", e);
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    })
}

impl Task for ProcessTask {
    fn id(&self) -> &TaskId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn run(&self) -> anyhow::Result<()> {
        if self.stop_requested.load(Ordering::SeqCst) {
            debug!("Task {} was stopped, not running '{}'", self.id, self.command);
            return Ok(());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.command_line()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child);
        if status.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        let status = status.with_context(|| format!("failed waiting on '{}'", self.command_line()))?;

        *self.sender_stats.lock() = SenderStats {
            metric_samples: stdout.lines().filter(|l| !l.trim().is_empty()).count() as u64,
            ..Default::default()
        };
        *self.warnings.lock() = stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| anyhow::anyhow!("{}", l.trim()))
            .collect();

        match status {
            None => Ok(()),
            Some(status) if status.success() => Ok(()),
            Some(status) => anyhow::bail!("'{}' exited with {}", self.command_line(), status),
        }
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn warnings(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.warnings.lock())
    }

    fn sender_stats(&self) -> SenderStats {
        *self.sender_stats.lock()
    }
}
