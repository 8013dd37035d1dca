//! Execution of a single task
//!
//! The worker owns the [`Task`] for the whole run. Nothing else writes its
//! counters; readers only ever see the snapshots published from here.

use crate::broadcaster::ProgressBroadcaster;
use crate::monitor::RateTracker;
use crate::task::{CopyRequest, RetryInfo, Task, TaskSnapshot, TaskState};
use copytask_config::EngineSettings;
use copytask_device::{required_with_margin, BufferAdvisor};
use copytask_io::{
    measure_sources, resolve_path, ChunkCopier, ControlFlags, FileTransfer, SourceKind,
    SourceSummary, TaskControl, TreeCopier,
};
use copytask_types::{BufferSize, CopyObserver, DeviceResolver, Error, ItemError, Result, RetryPolicy, SpaceProbe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Wraps the chunk copier built for each item
pub(crate) type TransferLayer = Arc<dyn Fn(ChunkCopier) -> Arc<dyn FileTransfer> + Send + Sync>;

/// Collaborators and settings shared by every worker
pub(crate) struct WorkerContext {
    pub settings: EngineSettings,
    pub retry: RetryPolicy,
    pub advisor: BufferAdvisor,
    pub resolver: Arc<dyn DeviceResolver>,
    pub space: Arc<dyn SpaceProbe>,
    pub transfer: Option<TransferLayer>,
    pub broadcaster: ProgressBroadcaster,
}

/// Observer that folds copy events into the task and publishes snapshots
struct Progress {
    task: Task,
    control: TaskControl,
    snapshots: watch::Sender<TaskSnapshot>,
    broadcaster: ProgressBroadcaster,
    interval: Duration,
    last_publish: Option<Instant>,
    rate: RateTracker,
    // Bytes already credited for the file in flight; retries restart from zero
    file: Option<PathBuf>,
    file_credit: u64,
}

impl Progress {
    fn new(
        task: Task,
        control: TaskControl,
        snapshots: watch::Sender<TaskSnapshot>,
        broadcaster: ProgressBroadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            task,
            control,
            snapshots,
            broadcaster,
            interval,
            last_publish: None,
            rate: RateTracker::default(),
            file: None,
            file_credit: 0,
        }
    }

    fn credit(&mut self, file: &Path, file_bytes: u64) {
        if self.file.as_deref() != Some(file) {
            self.file = Some(file.to_path_buf());
            self.file_credit = 0;
        }
        let delta = file_bytes.saturating_sub(self.file_credit);
        self.file_credit = self.file_credit.max(file_bytes);
        self.task.copied_bytes += delta;
        // Sources can grow between measuring and copying
        if self.task.copied_bytes > self.task.total_bytes {
            self.task.total_bytes = self.task.copied_bytes;
        }
    }

    fn end_file(&mut self) {
        self.file = None;
        self.file_credit = 0;
    }

    fn publish(&mut self) {
        self.rate.record(self.task.copied_bytes);
        if !self.task.state.is_terminal() {
            self.task.speed_bytes_per_sec = self.rate.speed();
            self.task.eta_seconds = self
                .rate
                .eta(self.task.total_bytes.saturating_sub(self.task.copied_bytes));
        }

        // Pending requests mean nothing once the task has stopped
        let flags = if self.task.state.is_terminal() {
            ControlFlags::default()
        } else {
            self.control.flags()
        };
        let snapshot = self.task.snapshot(flags);
        self.snapshots.send_replace(snapshot.clone());
        self.broadcaster.publish(snapshot);
        self.last_publish = Some(Instant::now());
    }

    fn publish_throttled(&mut self) {
        if self
            .last_publish
            .map_or(true, |at| at.elapsed() >= self.interval)
        {
            self.publish();
        }
    }

    fn set_state(&mut self, state: TaskState) {
        if self.task.transition(state) {
            self.publish();
        }
    }

    fn finish(mut self, state: TaskState) -> TaskSnapshot {
        // Terminal states other than Cancelled are only reachable from Running
        if state != TaskState::Cancelled && self.task.state != TaskState::Pending {
            self.task.transition(TaskState::Running);
        }
        self.rate.pause();
        self.task.retry = None;
        self.task.transition(state);
        self.publish();

        let task = &self.task;
        info!(
            task_id = %task.id,
            state = %task.state,
            copied_bytes = task.copied_bytes,
            total_bytes = task.total_bytes,
            errors = task.errors.len(),
            "Task finished"
        );
        self.snapshots.borrow().clone()
    }

    fn fail(mut self, error: &Error) -> TaskSnapshot {
        error!(task_id = %self.task.id, "Task failed: {}", error);
        self.task.fatal_error = Some(error.to_string());
        self.finish(TaskState::Failed)
    }
}

impl CopyObserver for Progress {
    fn on_progress(&mut self, file: &Path, file_bytes: u64) {
        self.credit(file, file_bytes);
        if self.task.current_item.as_deref() != Some(file) {
            self.task.current_item = Some(file.to_path_buf());
        }
        self.publish_throttled();
    }

    fn on_pause_changed(&mut self, paused: bool) {
        if paused {
            self.rate.pause();
            self.set_state(TaskState::Paused);
        } else {
            self.rate.resume();
            self.set_state(TaskState::Running);
        }
    }

    fn on_retry(&mut self, file: &Path, attempt: u32, delay: Duration, error: &Error) {
        self.task.retry = Some(RetryInfo {
            path: file.to_path_buf(),
            attempt,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            message: error.to_string(),
        });
        self.rate.pause();
        self.set_state(TaskState::Retrying);
    }

    fn on_retry_finished(&mut self, _file: &Path) {
        self.task.retry = None;
        self.rate.resume();
        self.set_state(TaskState::Running);
    }

    fn on_file_copied(&mut self, file: &Path, bytes: u64) {
        self.credit(file, bytes);
        self.end_file();
        self.task.copied_files += 1;
        self.publish_throttled();
    }

    fn on_file_skipped(&mut self, file: &Path, bytes: u64) {
        self.end_file();
        self.task.copied_bytes += bytes;
        if self.task.copied_bytes > self.task.total_bytes {
            self.task.total_bytes = self.task.copied_bytes;
        }
        self.task.skipped_files += 1;
        debug!(task_id = %self.task.id, "Skipped {}", file.display());
        self.publish_throttled();
    }

    fn on_item_error(&mut self, error: ItemError) {
        warn!(task_id = %self.task.id, "{}: {}", error.path.display(), error.message);
        self.end_file();
        self.task.errors.push(error);
        self.publish();
    }
}

/// Mark a task that never got a worker slot as cancelled
pub(crate) fn cancel_pending(
    task: Task,
    control: TaskControl,
    snapshots: watch::Sender<TaskSnapshot>,
    broadcaster: ProgressBroadcaster,
) -> TaskSnapshot {
    debug!(task_id = %task.id, "Cancelled before start");
    Progress::new(task, control, snapshots, broadcaster, Duration::ZERO).finish(TaskState::Cancelled)
}

/// Run a task to a terminal state and return its final snapshot
pub(crate) async fn execute(
    task: Task,
    control: TaskControl,
    snapshots: watch::Sender<TaskSnapshot>,
    ctx: Arc<WorkerContext>,
) -> TaskSnapshot {
    let mut progress = Progress::new(
        task,
        control.clone(),
        snapshots,
        ctx.broadcaster.clone(),
        ctx.settings.progress_interval,
    );
    if control.is_cancelled() {
        return progress.finish(TaskState::Cancelled);
    }

    progress.rate.resume();
    progress.set_state(TaskState::Running);
    let request = progress.task.request.clone();
    info!(
        task_id = %progress.task.id,
        sources = request.sources.len(),
        destination = %request.destination.display(),
        "Task started"
    );

    let summaries =
        match measure_sources(request.sources.clone(), request.options.follow_symlinks).await {
            Ok(summaries) => summaries,
            Err(e) => return progress.fail(&e),
        };
    progress.task.total_bytes = summaries.iter().map(|s| s.bytes).sum();
    progress.task.total_files = summaries.iter().map(|s| s.files).sum();
    progress.publish();

    if let Err(e) = precheck(&ctx, &request.destination, progress.task.total_bytes).await {
        return progress.fail(&e);
    }

    let mut failed_items = 0u64;
    let mut interrupted = false;

    for summary in &summaries {
        if control.checkpoint(&mut progress).await.is_err() {
            interrupted = true;
            break;
        }

        let errors_before = progress.task.errors.len();
        match copy_item(&ctx, &request, summary, &control, &mut progress).await {
            Ok(made_progress) => {
                if !made_progress && progress.task.errors.len() > errors_before {
                    failed_items += 1;
                }
            }
            Err(e) if e.is_cancelled() => {
                interrupted = true;
                break;
            }
            Err(e) => {
                progress.on_item_error(ItemError::new(&summary.path, &e));
                failed_items += 1;
            }
        }

        progress.task.completed_items += 1;
        progress.task.current_item = None;
        progress.publish();
    }

    let task = &mut progress.task;
    let state = if interrupted {
        TaskState::Cancelled
    } else if failed_items > 0 && failed_items == task.total_items {
        task.fatal_error = Some(format!("All {failed_items} items failed"));
        TaskState::Failed
    } else if !task.errors.is_empty() {
        TaskState::CompletedWithErrors
    } else {
        // Sources can shrink between measuring and copying
        task.total_bytes = task.copied_bytes;
        TaskState::Completed
    };
    progress.finish(state)
}

/// Fail early when the destination cannot be used or lacks free space
async fn precheck(ctx: &WorkerContext, destination: &Path, total_bytes: u64) -> Result<()> {
    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| Error::io(destination, e))?;

    let required = required_with_margin(total_bytes, ctx.settings.space_margin_percent);
    let space = Arc::clone(&ctx.space);
    let path = destination.to_path_buf();
    let available = tokio::task::spawn_blocking(move || space.available_space(&path))
        .await
        .unwrap_or_else(|e| {
            warn!("Free space probe for {} failed: {}", destination.display(), e);
            None
        });
    match available {
        Some(available) if available < required => Err(Error::InsufficientSpace {
            path: destination.to_path_buf(),
            required,
            available,
        }),
        _ => Ok(()),
    }
}

/// Copy one source entry into the destination directory
///
/// Returns whether any file was copied or skipped.
async fn copy_item(
    ctx: &WorkerContext,
    request: &CopyRequest,
    summary: &SourceSummary,
    control: &TaskControl,
    progress: &mut Progress,
) -> Result<bool> {
    let source = &summary.path;
    let target = request.destination.join(item_name(source).await?);
    let options = &request.options;

    let buffer_size = match options.chunk_size {
        Some(size) => size.get(),
        None => recommend_buffer(ctx, source, &request.destination).await,
    };
    let copier = ChunkCopier::new(buffer_size)
        .with_progress_interval(ctx.settings.progress_interval)
        .with_preserve_timestamps(options.preserve_timestamps)
        .with_verify(options.verify);
    let transfer: Arc<dyn FileTransfer> = match &ctx.transfer {
        Some(layer) => layer(copier),
        None => Arc::new(copier),
    };
    let tree = TreeCopier::from_options(transfer, options, ctx.retry.clone());

    progress.task.current_item = Some(source.clone());
    match summary.kind {
        SourceKind::Directory => {
            let stats = tree.copy(source, &target, control, progress).await?;
            Ok(stats.files_copied + stats.files_skipped > 0 || stats.errors == 0)
        }
        SourceKind::File => tree
            .copy_file(source, &target, control, progress)
            .await
            .map(|_| true),
        SourceKind::Missing => Err(Error::NotFound {
            path: source.clone(),
        }),
    }
}

/// Name an item keeps under the destination directory
///
/// Paths such as `.` or `dir/..` have no final component of their own and are
/// named after the directory they resolve to.
async fn item_name(source: &Path) -> Result<std::ffi::OsString> {
    if let Some(name) = source.file_name() {
        return Ok(name.to_os_string());
    }
    resolve_path(source)
        .await
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .ok_or_else(|| {
            Error::invalid_request(format!("source '{}' has no file name", source.display()))
        })
}

/// Buffer size for the device pair, classified off the async workers
///
/// Classification may read mount tables and sysfs.
async fn recommend_buffer(ctx: &WorkerContext, source: &Path, destination: &Path) -> usize {
    let advisor = ctx.advisor.clone();
    let resolver = Arc::clone(&ctx.resolver);
    let (from, to) = (source.to_path_buf(), destination.to_path_buf());
    tokio::task::spawn_blocking(move || advisor.recommend_for_paths(resolver.as_ref(), &from, &to))
        .await
        .unwrap_or_else(|e| {
            warn!("Device classification for {} failed: {}", source.display(), e);
            BufferSize::DEFAULT
        })
}
