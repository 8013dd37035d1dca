//! Transfer rate and ETA tracking

use crate::task::{TaskSnapshot, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window transfer rate over active (unpaused) time
#[derive(Debug, Clone)]
pub struct RateTracker {
    window: Duration,
    samples: VecDeque<(Duration, u64)>,
    active: Duration,
    resumed_at: Option<Instant>,
}

impl RateTracker {
    /// Create a stopped tracker averaging over `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            active: Duration::ZERO,
            resumed_at: None,
        }
    }

    /// Start or resume the clock
    pub fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    /// Stop the clock; paused time does not count towards the rate
    pub fn pause(&mut self) {
        if let Some(resumed_at) = self.resumed_at.take() {
            self.active += resumed_at.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.active + self.resumed_at.map_or(Duration::ZERO, |at| at.elapsed())
    }

    /// Record the cumulative byte count
    pub fn record(&mut self, total_bytes: u64) {
        self.record_at(self.elapsed(), total_bytes);
    }

    fn record_at(&mut self, at: Duration, total_bytes: u64) {
        self.samples.push_back((at, total_bytes));
        // Keep one sample older than the window as the baseline
        while self.samples.len() > 2
            && self.samples.get(1).is_some_and(|(t, _)| at.saturating_sub(*t) >= self.window)
        {
            self.samples.pop_front();
        }
    }

    /// Bytes per second over the window
    pub fn speed(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some((t0, b0)), Some((t1, b1))) if t1 > t0 => {
                b1.saturating_sub(*b0) as f64 / (*t1 - *t0).as_secs_f64()
            }
            _ => 0.0,
        }
    }

    /// Seconds until `remaining` bytes are done at the current speed
    pub fn eta(&self, remaining: u64) -> Option<u64> {
        let speed = self.speed();
        if remaining == 0 {
            Some(0)
        } else if speed > 0.0 {
            Some((remaining as f64 / speed).ceil() as u64)
        } else {
            None
        }
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Task counts per state across the manager's index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Tasks waiting for a worker
    pub pending: usize,
    /// Tasks copying, paused or retrying
    pub active: usize,
    /// Tasks completed without errors
    pub completed: usize,
    /// Tasks completed with item errors
    pub completed_with_errors: usize,
    /// Cancelled tasks
    pub cancelled: usize,
    /// Failed tasks
    pub failed: usize,
    /// Bytes copied across all tasks
    pub copied_bytes: u64,
}

impl Statistics {
    /// Tally a set of snapshots
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a TaskSnapshot>) -> Self {
        let mut stats = Self::default();
        for snapshot in snapshots {
            stats.copied_bytes += snapshot.copied_bytes;
            match snapshot.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running | TaskState::Paused | TaskState::Retrying => stats.active += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::CompletedWithErrors => stats.completed_with_errors += 1,
                TaskState::Cancelled => stats.cancelled += 1,
                TaskState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Total tasks tallied
    pub fn total(&self) -> usize {
        self.pending
            + self.active
            + self.completed
            + self.completed_with_errors
            + self.cancelled
            + self.failed
    }

    /// Percentage of finished tasks that completed without errors
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.completed_with_errors + self.cancelled + self.failed;
        if finished > 0 {
            (self.completed as f64 / finished as f64) * 100.0
        } else {
            0.0
        }
    }
}
