//! Task model: requests, the task state machine and snapshots

use chrono::{DateTime, Utc};
use copytask_io::ControlFlags;
use copytask_types::{CopyOptions, Error, ItemError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::TaskNotFound { id: s.to_string() })
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker slot
    Pending,
    /// Copying
    Running,
    /// Blocked at a checkpoint until resumed or cancelled
    Paused,
    /// Waiting out the backoff before retrying a failed file
    Retrying,
    /// Every item copied without errors
    Completed,
    /// Every item attempted, some failed
    CompletedWithErrors,
    /// Stopped on request
    Cancelled,
    /// A task-wide error prevented useful progress
    Failed,
}

impl TaskState {
    /// Check if the task is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Cancelled | Self::Failed
        )
    }

    /// Check if a worker currently owns the task
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Retrying)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Cancelled) => true,
            (Self::Running, Self::Paused | Self::Retrying) => true,
            (Self::Running, next) => next.is_terminal(),
            (Self::Paused | Self::Retrying, Self::Running | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed with errors",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An immutable copy request: sources, one destination directory and options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyRequest {
    /// Files and directories to copy, in order
    pub sources: Vec<PathBuf>,
    /// Directory the sources are copied into
    pub destination: PathBuf,
    /// Per-request options
    pub options: CopyOptions,
}

impl CopyRequest {
    /// Create a request with default options
    pub fn new<I, P, D>(sources: I, destination: D) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        D: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            destination: destination.into(),
            options: CopyOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a source
    pub fn add_source<P: Into<PathBuf>>(mut self, source: P) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Reject requests that can never run
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::invalid_request("at least one source path is required"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(Error::invalid_request("destination path is empty"));
        }
        Ok(())
    }
}

/// Details of the retry a task is currently waiting out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// File being retried
    pub path: PathBuf,
    /// Failed attempts so far
    pub attempt: u32,
    /// Backoff before the next attempt
    pub delay_ms: u64,
    /// The error that triggered the retry
    pub message: String,
}

/// Mutable state of one task, owned by the worker executing it
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Originating request
    pub request: CopyRequest,
    /// Current state
    pub state: TaskState,
    /// Bytes to copy, known after size discovery
    pub total_bytes: u64,
    /// Bytes copied or skipped so far
    pub copied_bytes: u64,
    /// Number of source entries
    pub total_items: u64,
    /// Source entries processed
    pub completed_items: u64,
    /// Files found under all sources
    pub total_files: u64,
    /// Files written
    pub copied_files: u64,
    /// Files left alone because of the overwrite policy
    pub skipped_files: u64,
    /// File currently being copied
    pub current_item: Option<PathBuf>,
    /// Recent transfer rate
    pub speed_bytes_per_sec: f64,
    /// Estimated seconds remaining
    pub eta_seconds: Option<u64>,
    /// Items that failed for good
    pub errors: Vec<ItemError>,
    /// Task-wide failure, set only for `Failed`
    pub fatal_error: Option<String>,
    /// Retry in progress, set only while `Retrying`
    pub retry: Option<RetryInfo>,
    /// Task this one was restarted from
    pub restarted_from: Option<TaskId>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Time a worker claimed the task
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with zeroed counters
    pub fn new(request: CopyRequest, restarted_from: Option<TaskId>) -> Self {
        Self {
            id: TaskId::new(),
            total_items: request.sources.len() as u64,
            request,
            state: TaskState::Pending,
            total_bytes: 0,
            copied_bytes: 0,
            completed_items: 0,
            total_files: 0,
            copied_files: 0,
            skipped_files: 0,
            current_item: None,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            errors: Vec::new(),
            fatal_error: None,
            retry: None,
            restarted_from,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Move to `next` if the state machine allows it
    ///
    /// Returns whether the state changed. Entering `Running` for the first time
    /// stamps `started_at`; entering a terminal state stamps `ended_at`.
    pub fn transition(&mut self, next: TaskState) -> bool {
        if self.state == next || !self.state.can_transition_to(next) {
            return false;
        }
        debug!(task_id = %self.id, "{} -> {}", self.state, next);

        if next == TaskState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.current_item = None;
            self.retry = None;
            self.eta_seconds = None;
        }
        self.state = next;
        true
    }

    /// Immutable copy of the observable fields
    pub fn snapshot(&self, flags: ControlFlags) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            state: self.state,
            request: self.request.clone(),
            total_bytes: self.total_bytes,
            copied_bytes: self.copied_bytes,
            total_items: self.total_items,
            completed_items: self.completed_items,
            total_files: self.total_files,
            copied_files: self.copied_files,
            skipped_files: self.skipped_files,
            current_item: self.current_item.clone(),
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds: self.eta_seconds,
            errors: self.errors.clone(),
            fatal_error: self.fatal_error.clone(),
            retry: self.retry.clone(),
            pause_requested: flags.pause_requested,
            cancel_requested: flags.cancel_requested,
            restarted_from: self.restarted_from,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Point-in-time view of a task, safe to hand to any reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier
    pub id: TaskId,
    /// State at the time of the snapshot
    pub state: TaskState,
    /// Originating request
    pub request: CopyRequest,
    /// Bytes to copy
    pub total_bytes: u64,
    /// Bytes copied or skipped
    pub copied_bytes: u64,
    /// Number of source entries
    pub total_items: u64,
    /// Source entries processed
    pub completed_items: u64,
    /// Files found under all sources
    pub total_files: u64,
    /// Files written
    pub copied_files: u64,
    /// Files skipped by the overwrite policy
    pub skipped_files: u64,
    /// File being copied
    pub current_item: Option<PathBuf>,
    /// Recent transfer rate in bytes per second
    pub speed_bytes_per_sec: f64,
    /// Estimated seconds remaining
    pub eta_seconds: Option<u64>,
    /// Failed items
    pub errors: Vec<ItemError>,
    /// Task-wide failure message
    pub fatal_error: Option<String>,
    /// Retry being waited out
    pub retry: Option<RetryInfo>,
    /// A pause has been requested
    pub pause_requested: bool,
    /// A cancel has been requested
    pub cancel_requested: bool,
    /// Task this one was restarted from
    pub restarted_from: Option<TaskId>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// End time
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Overall progress in percent
    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.copied_bytes as f64 / self.total_bytes as f64) * 100.0
        } else if self.state == TaskState::Completed {
            100.0
        } else {
            0.0
        }
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
