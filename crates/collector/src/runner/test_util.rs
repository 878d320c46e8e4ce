//! Scriptable task used by the runner, collector and scheduler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vigil_core::TaskId;

use crate::task::{SenderStats, Task};

/// How `run()` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Return straight away.
    Immediate,
    /// Block until `stop()` is called (or a safety deadline passes).
    UntilStopped,
    /// Sleep for a while, ignoring stop requests.
    Sleep(Duration),
    /// Panic inside `run()`.
    Panic,
}

pub struct TestTask {
    id: TaskId,
    interval: Duration,
    mode: RunMode,
    fail: bool,
    warnings: Vec<String>,
    stop_delay: Duration,
    stopped: Arc<AtomicBool>,
    pub runs: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub concurrent: Arc<AtomicUsize>,
    pub max_concurrent: Arc<AtomicUsize>,
    pending_warnings: Mutex<Vec<String>>,
}

impl TestTask {
    pub fn new(id: &str, interval: Duration) -> Self {
        Self {
            id: TaskId::from(id),
            interval,
            mode: RunMode::Immediate,
            fail: false,
            warnings: Vec::new(),
            stop_delay: Duration::ZERO,
            stopped: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            pending_warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn recurring(id: &str) -> Self {
        Self::new(id, Duration::from_secs(15))
    }

    pub fn one_shot(id: &str) -> Self {
        Self::new(id, Duration::ZERO)
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn warning(mut self, warning: &str) -> Self {
        self.warnings.push(warning.to_string());
        self
    }

    /// Make `stop()` itself take this long to return.
    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Share counters with another instance of the same identity.
    pub fn sharing_counters_with(mut self, other: &TestTask) -> Self {
        self.runs = Arc::clone(&other.runs);
        self.concurrent = Arc::clone(&other.concurrent);
        self.max_concurrent = Arc::clone(&other.max_concurrent);
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Task for TestTask {
    fn id(&self) -> &TaskId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn run(&self) -> anyhow::Result<()> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            RunMode::Immediate => {}
            RunMode::UntilStopped => {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !self.stopped.load(Ordering::SeqCst) && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            RunMode::Sleep(d) => std::thread::sleep(d),
            RunMode::Panic => {
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                panic!("{} panicked", self.id);
            }
        }

        *self.pending_warnings.lock() = self.warnings.clone();
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            anyhow::bail!("{} failed", self.id);
        }
        Ok(())
    }

    fn stop(&self) {
        std::thread::sleep(self.stop_delay);
        self.stopped.store(true, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn warnings(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.pending_warnings.lock())
            .into_iter()
            .map(anyhow::Error::msg)
            .collect()
    }

    fn sender_stats(&self) -> SenderStats {
        SenderStats {
            metric_samples: 1,
            ..Default::default()
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
