//! Copy task engine for copytask
//!
//! This crate runs copy requests concurrently on a bounded worker pool and
//! reports on them.
//!
//! # Features
//!
//! - **Task Management**: submit requests, then pause, resume, cancel or restart them by id
//! - **Bounded Concurrency**: at most `worker_count` tasks copy at once, one worker per task
//! - **Progress Tracking**: time-throttled snapshots fanned out to any number of subscribers
//! - **Error Recovery**: per-file retries, with failures recorded per item rather than aborting
//! - **History**: finished tasks stay queryable until evicted, and can be exported as JSON
//!
//! # Examples
//!
//! ```rust,no_run
//! use copytask_engine::{CopyRequest, TaskManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TaskManager::new();
//! let id = manager
//!     .submit(CopyRequest::new(["photos", "notes.txt"], "/mnt/backup"))
//!     .await?;
//!
//! let mut updates = manager.subscribe();
//! while let Some(snapshot) = updates.recv().await {
//!     println!("{}: {:.1}%", snapshot.state, snapshot.progress_percent());
//!     if snapshot.id == id && snapshot.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcaster;
pub mod manager;
pub mod monitor;
pub mod task;
mod worker;

pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use manager::{device_resolver, ControlAction, ControlOutcome, TaskLog, TaskManager, TaskManagerBuilder};
pub use monitor::{RateTracker, Statistics};
pub use task::{CopyRequest, RetryInfo, Task, TaskId, TaskSnapshot, TaskState};

pub use copytask_types::{CopyOptions, Error, ErrorKind, ItemError, OverwritePolicy, Result, VerifyMode};
