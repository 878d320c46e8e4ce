use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use vigil_core::TaskId;

use crate::task::Task;

pub type RunningTasks = HashMap<TaskId, Arc<dyn Task>>;

/// Thread-safe registry of the tasks currently inside `run()`.
///
/// An identity is present exactly while a worker executes it, which is what
/// keeps a task from running twice at the same time.
#[derive(Default)]
pub struct RunningTracker {
    running: Mutex<RunningTasks>,
}

/// Locked view of the tracker, for check-then-act sequences that must not
/// interleave with workers registering or removing tasks.
pub struct LockedTracker<'a> {
    guard: MutexGuard<'a, RunningTasks>,
}

impl LockedTracker<'_> {
    pub fn check(&self, id: &TaskId) -> Option<Arc<dyn Task>> {
        self.guard.get(id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.guard.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

impl RunningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task unless its identity is already running.
    /// Returns whether the task was added; `false` means "do not run it now".
    pub fn add_check(&self, task: &Arc<dyn Task>) -> bool {
        let mut running = self.running.lock();
        if running.contains_key(task.id()) {
            return false;
        }
        running.insert(task.id().clone(), Arc::clone(task));
        true
    }

    pub fn delete_check(&self, id: &TaskId) {
        self.running.lock().remove(id);
    }

    pub fn check(&self, id: &TaskId) -> Option<Arc<dyn Task>> {
        self.running.lock().get(id).cloned()
    }

    /// Copy of the running set.
    pub fn running_checks(&self) -> RunningTasks {
        self.running.lock().clone()
    }

    /// Call `f` with a snapshot of the running set. The lock is only held
    /// while copying, so `f` may take its time.
    pub fn with_running_checks<F>(&self, f: F)
    where
        F: FnOnce(&RunningTasks),
    {
        let snapshot = self.running_checks();
        f(&snapshot)
    }

    pub fn lock(&self) -> LockedTracker<'_> {
        LockedTracker {
            guard: self.running.lock(),
        }
    }

    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::runner::test_util::TestTask;

    fn task(id: &str) -> Arc<dyn Task> {
        Arc::new(TestTask::recurring(id))
    }

    #[test]
    fn add_is_insert_if_absent() {
        let tracker = RunningTracker::new();
        let first = task("disk:1");
        let duplicate = task("disk:1");

        assert!(tracker.add_check(&first));
        assert!(!tracker.add_check(&duplicate));
        assert_eq!(tracker.len(), 1);

        // the first instance stays registered
        let found = tracker.check(first.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn delete_is_unconditional() {
        let tracker = RunningTracker::new();
        let t = task("disk:1");
        tracker.add_check(&t);

        tracker.delete_check(t.id());
        tracker.delete_check(t.id());
        assert!(tracker.check(t.id()).is_none());
        assert!(tracker.is_empty());
        assert!(tracker.add_check(&t));
    }

    #[test]
    fn snapshot_is_detached() {
        let tracker = RunningTracker::new();
        tracker.add_check(&task("disk:1"));
        tracker.add_check(&task("cpu:1"));

        tracker.with_running_checks(|running| {
            assert_eq!(running.len(), 2);
            // the live map is not locked while the callback runs
            tracker.delete_check(&TaskId::from("cpu:1"));
            assert_eq!(running.len(), 2);
        });
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn locked_view() {
        let tracker = RunningTracker::new();
        let t = task("disk:1");
        tracker.add_check(&t);

        let locked = tracker.lock();
        assert!(locked.contains(t.id()));
        assert!(locked.check(&TaskId::from("cpu:1")).is_none());
        assert_eq!(locked.len(), 1);
        assert!(!locked.is_empty());
    }

    #[test]
    fn concurrent_adds_admit_one() {
        let tracker = Arc::new(RunningTracker::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    tracker.add_check(&task("disk:1"))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(admitted, 1);
    }
}
