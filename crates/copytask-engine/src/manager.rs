//! Task manager: submission, worker pool and control routing

use crate::broadcaster::{ProgressBroadcaster, Subscription};
use crate::monitor::Statistics;
use crate::task::{CopyRequest, Task, TaskId, TaskSnapshot, TaskState};
use crate::worker::{self, TransferLayer, WorkerContext};
use chrono::{DateTime, Utc};
use copytask_config::{Config, DeviceConfig, EngineSettings};
use copytask_device::{BufferAdvisor, PrefixDeviceResolver, SystemDeviceResolver, SystemSpaceProbe};
use copytask_io::{ChunkCopier, FileTransfer, TaskControl};
use copytask_types::{DeviceResolver, Error, LicenseGate, Result, RetryPolicy, SpaceProbe, Unlimited};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Action routed to a task through [`TaskManager::control`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Block at the next checkpoint
    Pause,
    /// Continue a paused task
    Resume,
    /// Stop at the next checkpoint
    Cancel,
    /// Run a finished task's request again as a new task
    Restart,
}

/// Result of a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The request changed the task's control flags
    Applied,
    /// The action does not apply to the task's current state
    Ignored,
    /// A new task was created from the finished one
    Restarted(TaskId),
}

/// Audit log written by [`TaskManager::export_log`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    /// Time of export
    pub exported_at: DateTime<Utc>,
    /// Every task in the index, in submission order
    pub tasks: Vec<TaskSnapshot>,
}

struct TaskEntry {
    control: TaskControl,
    snapshot: watch::Receiver<TaskSnapshot>,
    handle: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn snapshot(&self) -> TaskSnapshot {
        let mut snapshot = self.snapshot.borrow().clone();
        if !snapshot.is_terminal() {
            let flags = self.control.flags();
            snapshot.pause_requested = flags.pause_requested;
            snapshot.cancel_requested = flags.cancel_requested;
        }
        snapshot
    }

    fn state(&self) -> TaskState {
        self.snapshot.borrow().state
    }

    fn apply(&self, action: ControlAction) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        match action {
            ControlAction::Pause => self.control.request_pause(),
            ControlAction::Resume => self.control.request_resume(),
            ControlAction::Cancel => self.control.request_cancel(),
            ControlAction::Restart => false,
        }
    }
}

#[derive(Default)]
struct TaskIndex {
    entries: HashMap<TaskId, TaskEntry>,
    order: Vec<TaskId>,
}

impl TaskIndex {
    fn insert(&mut self, id: TaskId, entry: TaskEntry) {
        self.entries.insert(id, entry);
        self.order.push(id);
    }

    fn remove(&mut self, id: TaskId) -> Option<TaskEntry> {
        let entry = self.entries.remove(&id)?;
        self.order.retain(|other| *other != id);
        Some(entry)
    }

    /// Drop the oldest terminal tasks until at most `limit` remain
    fn evict(&mut self, limit: usize) -> usize {
        let terminal: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| self.entries.get(id).is_some_and(|e| e.state().is_terminal()))
            .copied()
            .collect();
        let excess = terminal.len().saturating_sub(limit);
        for id in &terminal[..excess] {
            self.remove(*id);
        }
        excess
    }

    fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(TaskEntry::snapshot)
            .collect()
    }
}

struct Inner {
    index: RwLock<TaskIndex>,
    slots: Arc<Semaphore>,
    worker_count: usize,
    history_limit: usize,
    gate: Arc<dyn LicenseGate>,
    context: Arc<WorkerContext>,
    shutting_down: AtomicBool,
}

/// Owns the worker pool and the index of every known task
///
/// Cloning is cheap; clones share the same pool and index.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("worker_count", &self.inner.worker_count)
            .field("history_limit", &self.inner.history_limit)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Create a manager with default settings and system collaborators
    pub fn new() -> Self {
        TaskManagerBuilder::new().build()
    }

    /// Create a manager from loaded configuration
    pub fn with_config(config: &Config) -> Self {
        TaskManagerBuilder::new().with_config(config).build()
    }

    /// Create a builder
    pub fn builder() -> TaskManagerBuilder {
        TaskManagerBuilder::new()
    }

    /// Validate and enqueue a request, returning the new task's id
    ///
    /// Returns as soon as the task is queued. Fails when the request has no
    /// sources, the license gate refuses it or the destination directory
    /// cannot be created.
    pub async fn submit(&self, request: CopyRequest) -> Result<TaskId> {
        self.submit_inner(request, None).await
    }

    async fn submit_inner(&self, request: CopyRequest, restarted_from: Option<TaskId>) -> Result<TaskId> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(Error::other("Task manager is shutting down"));
        }
        request.validate()?;
        let items = request.sources.len();
        if !self.inner.gate.check_license_limit(items) {
            return Err(Error::LicenseLimit { items });
        }
        tokio::fs::create_dir_all(&request.destination)
            .await
            .map_err(|e| Error::io(&request.destination, e))?;

        Ok(self.enqueue(Task::new(request, restarted_from)).await)
    }

    async fn enqueue(&self, task: Task) -> TaskId {
        let id = task.id;
        let control = TaskControl::new();
        let initial = task.snapshot(control.flags());
        let (tx, rx) = watch::channel(initial.clone());
        self.inner.context.broadcaster.publish(initial);

        let slots = Arc::clone(&self.inner.slots);
        let context = Arc::clone(&self.inner.context);
        let job_control = control.clone();
        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                () = job_control.cancelled() => None,
                permit = slots.acquire_owned() => permit.ok(),
            };
            match permit {
                Some(_permit) => {
                    worker::execute(task, job_control, tx, context).await;
                }
                None => {
                    worker::cancel_pending(task, job_control, tx, context.broadcaster.clone());
                }
            }
        });

        let mut index = self.inner.index.write().await;
        index.insert(
            id,
            TaskEntry {
                control,
                snapshot: rx,
                handle: Some(handle),
            },
        );
        let evicted = index.evict(self.inner.history_limit);
        drop(index);

        if evicted > 0 {
            debug!("Evicted {} finished tasks from history", evicted);
        }
        info!(task_id = %id, "Task submitted");
        id
    }

    /// Route a control action to a task
    ///
    /// Unknown ids fail with [`Error::TaskNotFound`]. Actions that do not apply
    /// to the task's current state are ignored rather than rejected.
    pub async fn control(&self, id: TaskId, action: ControlAction) -> Result<ControlOutcome> {
        let index = self.inner.index.read().await;
        let entry = index.entries.get(&id).ok_or_else(|| not_found(id))?;

        if action != ControlAction::Restart {
            let applied = entry.apply(action);
            debug!(task_id = %id, ?action, applied, "Control request");
            return Ok(if applied {
                ControlOutcome::Applied
            } else {
                ControlOutcome::Ignored
            });
        }

        let snapshot = entry.snapshot();
        drop(index);
        if !snapshot.is_terminal() {
            return Ok(ControlOutcome::Ignored);
        }
        let new_id = self.submit_inner(snapshot.request, Some(id)).await?;
        info!(task_id = %new_id, restarted_from = %id, "Task restarted");
        Ok(ControlOutcome::Restarted(new_id))
    }

    /// Apply pause, resume or cancel to every task it applies to
    ///
    /// Returns how many tasks were affected.
    pub async fn control_all(&self, action: ControlAction) -> Result<usize> {
        if action == ControlAction::Restart {
            return Err(Error::invalid_request("restart applies to a single task"));
        }
        let index = self.inner.index.read().await;
        let applied = index
            .entries
            .values()
            .filter(|entry| entry.apply(action))
            .count();
        info!(?action, applied, "Control request for all tasks");
        Ok(applied)
    }

    /// Latest snapshot of a task
    pub async fn get(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.inner
            .index
            .read()
            .await
            .entries
            .get(&id)
            .map(TaskEntry::snapshot)
    }

    /// Latest snapshots of every task in submission order
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        self.inner.index.read().await.snapshots()
    }

    /// Wait until a task reaches a terminal state
    pub async fn wait(&self, id: TaskId) -> Result<TaskSnapshot> {
        let mut rx = {
            let index = self.inner.index.read().await;
            index
                .entries
                .get(&id)
                .ok_or_else(|| not_found(id))?
                .snapshot
                .clone()
        };
        let snapshot = rx
            .wait_for(TaskSnapshot::is_terminal)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| Error::other(format!("Task {id} stopped without finishing")))?;
        Ok(snapshot)
    }

    /// Cancel a task if it is still running and drop it from the index
    pub async fn remove(&self, id: TaskId) -> Result<TaskSnapshot> {
        let entry = self
            .inner
            .index
            .write()
            .await
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        entry.control.request_cancel();
        info!(task_id = %id, "Task removed");
        Ok(entry.snapshot())
    }

    /// Drop every finished task from the index
    pub async fn clear_finished(&self) -> usize {
        let cleared = self.inner.index.write().await.evict(0);
        debug!("Cleared {} finished tasks", cleared);
        cleared
    }

    /// Write every snapshot to `path` as pretty-printed JSON
    ///
    /// Returns the number of tasks written.
    pub async fn export_log(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let log = TaskLog {
            exported_at: Utc::now(),
            tasks: self.list().await,
        };
        let json = serde_json::to_string_pretty(&log)
            .map_err(|e| Error::other(format!("Failed to serialize task log: {e}")))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::io(path, e))?;
        info!("Exported {} tasks to {}", log.tasks.len(), path.display());
        Ok(log.tasks.len())
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> Subscription {
        self.inner.context.broadcaster.subscribe()
    }

    /// The broadcaster snapshots are published through
    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.inner.context.broadcaster
    }

    /// Size of the worker pool
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Workers currently executing a task
    pub fn busy_workers(&self) -> usize {
        self.inner.worker_count - self.inner.slots.available_permits()
    }

    /// Task counts per state
    pub async fn statistics(&self) -> Statistics {
        Statistics::from_snapshots(&self.list().await)
    }

    /// Cancel every unfinished task and wait for their workers to stop
    ///
    /// Later submissions are rejected.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = {
            let mut index = self.inner.index.write().await;
            index
                .entries
                .values_mut()
                .filter_map(|entry| {
                    entry.control.request_cancel();
                    entry.handle.take()
                })
                .collect()
        };

        info!("Shutting down, waiting for {} tasks", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task worker ended abnormally: {}", e);
            }
        }
        self.inner.slots.close();
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: TaskId) -> Error {
    Error::TaskNotFound { id: id.to_string() }
}

/// Builder for [`TaskManager`]
pub struct TaskManagerBuilder {
    settings: EngineSettings,
    retry: RetryPolicy,
    advisor: BufferAdvisor,
    devices: DeviceConfig,
    resolver: Option<Arc<dyn DeviceResolver>>,
    space: Arc<dyn SpaceProbe>,
    gate: Arc<dyn LicenseGate>,
    transfer: Option<TransferLayer>,
}

impl TaskManagerBuilder {
    /// Create a builder with default settings
    ///
    /// The worker pool defaults to the number of CPUs, clamped to 2..=8.
    pub fn new() -> Self {
        let config = Config::default();
        let mut settings = config.engine_settings();
        settings.worker_count = num_cpus::get().clamp(2, 8);
        Self {
            settings,
            retry: config.retry_policy(),
            advisor: BufferAdvisor::new(),
            devices: config.devices,
            resolver: None,
            space: Arc::new(SystemSpaceProbe),
            gate: Arc::new(Unlimited),
            transfer: None,
        }
    }

    /// Take settings, retry backoff, buffer overrides and device rules from `config`
    pub fn with_config(mut self, config: &Config) -> Self {
        self.settings = config.engine_settings();
        self.retry = config.retry_policy();
        self.advisor = config
            .buffers
            .overrides()
            .into_iter()
            .fold(BufferAdvisor::new(), |advisor, (class, size)| {
                advisor.with_override(class, size)
            });
        self.devices = config.devices.clone();
        self
    }

    /// Replace the engine settings
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the number of tasks copied concurrently
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.settings.worker_count = worker_count.max(1);
        self
    }

    /// Set the retry backoff
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the buffer advisor
    pub fn with_buffer_advisor(mut self, advisor: BufferAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    /// Classify paths with `resolver` instead of the configured rules
    pub fn with_device_resolver(mut self, resolver: Arc<dyn DeviceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Probe free space with `space`
    pub fn with_space_probe(mut self, space: Arc<dyn SpaceProbe>) -> Self {
        self.space = space;
        self
    }

    /// Gate submissions with `gate`
    pub fn with_license_gate(mut self, gate: Arc<dyn LicenseGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Wrap the per-file copier of every item with `layer`
    ///
    /// The layer receives the [`ChunkCopier`] configured for the item (buffer
    /// size, verification, timestamps) and returns the transfer actually used.
    /// Retries, overwrite handling and progress accounting stay in the engine.
    pub fn with_transfer_layer<F>(mut self, layer: F) -> Self
    where
        F: Fn(ChunkCopier) -> Arc<dyn FileTransfer> + Send + Sync + 'static,
    {
        self.transfer = Some(Arc::new(layer));
        self
    }

    /// Build the manager
    pub fn build(self) -> TaskManager {
        let resolver = self
            .resolver
            .unwrap_or_else(|| device_resolver(&self.devices));
        let worker_count = self.settings.worker_count.max(1);
        let history_limit = self.settings.history_limit;
        let broadcaster = ProgressBroadcaster::new(self.settings.broadcast_capacity);

        info!("Task manager started with {} workers", worker_count);
        TaskManager {
            inner: Arc::new(Inner {
                index: RwLock::new(TaskIndex::default()),
                slots: Arc::new(Semaphore::new(worker_count)),
                worker_count,
                history_limit,
                gate: self.gate,
                context: Arc::new(WorkerContext {
                    settings: self.settings,
                    retry: self.retry,
                    advisor: self.advisor,
                    resolver,
                    space: self.space,
                    transfer: self.transfer,
                    broadcaster,
                }),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for TaskManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolver built from configured prefix rules, falling back to mount detection
pub fn device_resolver(devices: &DeviceConfig) -> Arc<dyn DeviceResolver> {
    let mut resolver = devices
        .rules
        .iter()
        .fold(PrefixDeviceResolver::new(devices.default_class), |resolver, rule| {
            resolver.with_rule(rule.prefix.clone(), rule.class)
        });
    if devices.detect_mounts {
        resolver = resolver.with_fallback(Arc::new(SystemDeviceResolver::new(devices.default_class)));
    }
    Arc::new(resolver)
}
