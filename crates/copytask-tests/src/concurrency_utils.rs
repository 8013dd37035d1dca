//! Concurrency testing utilities
//!
//! [`ActivityTracker`] replays the snapshot stream of a task manager and
//! records how many tasks were active at once. Snapshots leave the
//! broadcaster in publish order, so the count at each step reflects a real
//! instant of the pool.

use copytask_engine::{TaskId, TaskSnapshot, TaskState};
use std::collections::{HashMap, HashSet};

/// Tracks the latest state of every task seen in a snapshot stream
#[derive(Debug, Default)]
pub struct ActivityTracker {
    states: HashMap<TaskId, TaskState>,
    max_active: usize,
    finished: HashSet<TaskId>,
    snapshots_after_terminal: usize,
    regressions: usize,
    copied: HashMap<TaskId, u64>,
}

impl ActivityTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one snapshot into the tracker
    pub fn observe(&mut self, snapshot: &TaskSnapshot) {
        if self.finished.contains(&snapshot.id) {
            self.snapshots_after_terminal += 1;
        }
        if snapshot.is_terminal() {
            self.finished.insert(snapshot.id);
        }

        let previous = self.copied.insert(snapshot.id, snapshot.copied_bytes);
        if previous.is_some_and(|bytes| bytes > snapshot.copied_bytes) {
            self.regressions += 1;
        }

        self.states.insert(snapshot.id, snapshot.state);
        self.max_active = self.max_active.max(self.active());
    }

    /// Tasks whose latest state is running, paused or retrying
    pub fn active(&self) -> usize {
        self.states.values().filter(|state| state.is_active()).count()
    }

    /// Highest number of simultaneously active tasks observed
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Tasks that have published a terminal snapshot
    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    /// Snapshots received for a task after its terminal one
    pub fn snapshots_after_terminal(&self) -> usize {
        self.snapshots_after_terminal
    }

    /// Times a task's `copied_bytes` went backwards between snapshots
    pub fn regressions(&self) -> usize {
        self.regressions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytask_engine::{CopyRequest, Task};

    fn snapshot(task: &mut Task, state: TaskState, copied: u64) -> TaskSnapshot {
        task.transition(state);
        task.copied_bytes = copied;
        task.snapshot(Default::default())
    }

    #[test]
    fn test_tracks_active_tasks() {
        let mut a = Task::new(CopyRequest::new(["/a"], "/dst"), None);
        let mut b = Task::new(CopyRequest::new(["/b"], "/dst"), None);
        let mut tracker = ActivityTracker::new();

        tracker.observe(&snapshot(&mut a, TaskState::Running, 0));
        tracker.observe(&snapshot(&mut b, TaskState::Running, 0));
        assert_eq!(tracker.active(), 2);

        tracker.observe(&snapshot(&mut a, TaskState::Completed, 10));
        assert_eq!(tracker.active(), 1);
        assert_eq!(tracker.max_active(), 2);
        assert_eq!(tracker.finished(), 1);

        tracker.observe(&snapshot(&mut a, TaskState::Completed, 5));
        assert_eq!(tracker.snapshots_after_terminal(), 1);
        assert_eq!(tracker.regressions(), 1);
    }
}
