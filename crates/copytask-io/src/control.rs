//! Cooperative pause and cancellation for copy loops
//!
//! A [`TaskControl`] is shared between whoever issues control requests and the
//! worker running the copy. Requests only flip flags; the copy loops observe
//! them at checkpoints, which sit between chunks and between directory entries.

use copytask_types::{CopyObserver, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Snapshot of the externally settable control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    /// A pause has been requested and not yet resumed
    pub pause_requested: bool,
    /// A cancel has been requested; never cleared
    pub cancel_requested: bool,
}

/// Handle used to pause, resume and cancel a running copy
#[derive(Debug, Clone)]
pub struct TaskControl {
    flags: Arc<watch::Sender<ControlFlags>>,
}

impl TaskControl {
    /// Create a control handle with no requests pending
    pub fn new() -> Self {
        let (flags, _) = watch::channel(ControlFlags::default());
        Self {
            flags: Arc::new(flags),
        }
    }

    /// Current flag values
    pub fn flags(&self) -> ControlFlags {
        *self.flags.borrow()
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flags.borrow().cancel_requested
    }

    /// Whether a pause is currently requested
    pub fn is_paused(&self) -> bool {
        self.flags.borrow().pause_requested
    }

    /// Request a pause; returns `false` if already paused or cancelled
    pub fn request_pause(&self) -> bool {
        self.flags.send_if_modified(|flags| {
            if flags.pause_requested || flags.cancel_requested {
                false
            } else {
                flags.pause_requested = true;
                true
            }
        })
    }

    /// Clear a pause request; returns `false` if no pause was pending
    pub fn request_resume(&self) -> bool {
        self.flags.send_if_modified(|flags| {
            if flags.pause_requested && !flags.cancel_requested {
                flags.pause_requested = false;
                true
            } else {
                false
            }
        })
    }

    /// Request cancellation; returns `false` if it was already requested
    pub fn request_cancel(&self) -> bool {
        self.flags.send_if_modified(|flags| {
            if flags.cancel_requested {
                false
            } else {
                flags.cancel_requested = true;
                true
            }
        })
    }

    /// Checkpoint between units of work
    ///
    /// Fails with [`Error::Cancelled`] when cancellation is pending. When a pause
    /// is pending, reports it to `observer`, blocks until resumed or cancelled
    /// and reports the resume.
    pub async fn checkpoint(&self, observer: &mut dyn CopyObserver) -> Result<()> {
        let flags = self.flags();
        if flags.cancel_requested {
            return Err(Error::Cancelled);
        }
        if !flags.pause_requested {
            return Ok(());
        }

        debug!("Copy paused at checkpoint");
        observer.on_pause_changed(true);
        self.wait_until_resumed().await?;
        observer.on_pause_changed(false);
        debug!("Copy resumed");
        Ok(())
    }

    /// Block until no pause is pending, failing early on cancellation
    pub async fn wait_until_resumed(&self) -> Result<()> {
        let mut rx = self.flags.subscribe();
        let cancelled = rx
            .wait_for(|flags| !flags.pause_requested || flags.cancel_requested)
            .await
            .map_or(true, |flags| flags.cancel_requested);

        if cancelled {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.flags.subscribe();
        let _ = rx.wait_for(|flags| flags.cancel_requested).await;
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(duration) => {
                if self.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Ok(())
                }
            }
            () = self.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytask_types::NoopObserver;
    use std::time::Instant;

    #[derive(Default)]
    struct PauseLog(Vec<bool>);

    impl CopyObserver for PauseLog {
        fn on_pause_changed(&mut self, paused: bool) {
            self.0.push(paused);
        }
    }

    #[test]
    fn test_requests_are_idempotent() {
        let control = TaskControl::new();
        assert!(!control.request_resume());
        assert!(control.request_pause());
        assert!(!control.request_pause());
        assert!(control.request_resume());
        assert!(control.request_cancel());
        assert!(!control.request_cancel());
        assert!(!control.request_pause());
        assert!(control.is_cancelled());
    }

    #[tokio::test]
    async fn test_checkpoint_passes_when_idle() {
        let control = TaskControl::new();
        control.checkpoint(&mut NoopObserver).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_until_resume() {
        let control = TaskControl::new();
        control.request_pause();

        let remote = control.clone();
        let resumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remote.request_resume();
        });

        let mut log = PauseLog::default();
        let started = Instant::now();
        control.checkpoint(&mut log).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(log.0, vec![true, false]);
        resumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unblocks_paused_checkpoint() {
        let control = TaskControl::new();
        control.request_pause();

        let remote = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.request_cancel();
        });

        let mut log = PauseLog::default();
        let result = tokio::time::timeout(Duration::from_secs(5), control.checkpoint(&mut log))
            .await
            .expect("cancel must wake a paused checkpoint");
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(log.0, vec![true]);
    }

    #[tokio::test]
    async fn test_sleep_is_cancellable() {
        let control = TaskControl::new();
        let remote = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.request_cancel();
        });

        let started = Instant::now();
        let result = control.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let control = TaskControl::new();
        control.sleep(Duration::from_millis(5)).await.unwrap();
    }
}
