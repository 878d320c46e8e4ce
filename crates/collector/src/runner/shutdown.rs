use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use vigil_core::TaskId;

use crate::error::CollectorError;
use crate::task::Task;

use super::core::Runner;
use super::{STOP_ALL_CHECKS_TIMEOUT, STOP_CHECK_TIMEOUT};

/// Call `task.stop()` on its own thread. The returned receiver yields once
/// `stop()` has returned.
fn request_stop(task: Arc<dyn Task>) -> flume::Receiver<()> {
    let (done_tx, done_rx) = flume::bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("stop-{}", task.id()))
        .spawn(move || {
            task.stop();
            let _ = done_tx.send(());
        });
    if let Err(e) = spawned {
        // done_tx went down with the closure, the receiver reports it
        error!("Failed to spawn stop thread: {}", e);
    }
    done_rx
}

impl Runner {
    /// Ask a running task to stop and wait briefly for `stop()` to return.
    ///
    /// A task that is not running is a no-op. A timeout is reported but
    /// nothing is killed: ending `run()` stays the task's job.
    pub fn stop_check(&self, id: &TaskId) -> Result<(), CollectorError> {
        let done = {
            let running = self.tracker.lock();
            match running.check(id) {
                Some(task) => {
                    debug!("Stopping task {}", id);
                    request_stop(task)
                }
                None => {
                    debug!("Task {} is not running, not stopping it", id);
                    return Ok(());
                }
            }
        };

        match done.recv_timeout(STOP_CHECK_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(flume::RecvTimeoutError::Timeout) => Err(CollectorError::StopTimeout {
                id: id.clone(),
                timeout: STOP_CHECK_TIMEOUT,
            }),
            Err(flume::RecvTimeoutError::Disconnected) => Err(CollectorError::StopFailed(id.clone())),
        }
    }

    /// Close the dispatch queue and ask every running task to stop.
    ///
    /// Runs once; later calls return immediately. Producers must have stopped
    /// sending before this is called. Waits at most
    /// [`STOP_ALL_CHECKS_TIMEOUT`] for the running tasks.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Runner {} already stopped, nothing to do", self.id);
            return;
        }

        info!("Runner {} is shutting down...", self.id);
        // dropping the only strong sender closes the queue
        self.sender.write().take();

        let (all_done_tx, all_done_rx) = flume::unbounded::<()>();
        let mut pending = 0usize;

        self.tracker.with_running_checks(|running| {
            for task in running.values() {
                info!("Stopping task {} that is still running...", task.id());
                pending += 1;

                let done = request_stop(Arc::clone(task));
                let all_done = all_done_tx.clone();
                let id = task.id().clone();
                let spawned = thread::Builder::new()
                    .name(format!("stop-wait-{}", id))
                    .spawn(move || {
                        match done.recv_timeout(STOP_CHECK_TIMEOUT) {
                            Ok(()) => {}
                            Err(flume::RecvTimeoutError::Timeout) => {
                                warn!("Task {} not responding after {:?}", id, STOP_CHECK_TIMEOUT);
                                let _ = done.recv();
                            }
                            Err(flume::RecvTimeoutError::Disconnected) => {
                                warn!("Stop request for task {} was lost", id);
                            }
                        }
                        let _ = all_done.send(());
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn stop watcher for {}: {}", task.id(), e);
                    pending -= 1;
                }
            }
        });
        drop(all_done_tx);

        debug!("Runner {} waiting for {} running tasks to stop...", self.id, pending);
        let deadline = Instant::now() + STOP_ALL_CHECKS_TIMEOUT;
        for _ in 0..pending {
            if all_done_rx.recv_deadline(deadline).is_err() {
                error!(
                    "Some tasks on runner {} not responding after {:?}, timing out...",
                    self.id, STOP_ALL_CHECKS_TIMEOUT
                );
                for info in self.workers().values() {
                    warn!("Worker {} started at {} is still busy", info.thread_name, info.started_at);
                }
                return;
            }
        }

        info!("Runner {} shut down", self.id);
    }
}
