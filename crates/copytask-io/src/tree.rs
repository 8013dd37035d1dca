//! Directory tree copying
//!
//! [`TreeCopier`] walks a source directory depth-first in name order, creating
//! every destination directory as soon as it is reached and copying files
//! through a [`FileTransfer`] (normally a [`ChunkCopier`](crate::ChunkCopier)) with the configured
//! retry policy. A failure on one
//! entry is reported to the observer as an item error and the walk carries on;
//! only cancellation stops it.

use crate::{FileTransfer, TaskControl};
use copytask_types::{
    CopyObserver, CopyOptions, CopyStats, Error, ItemError, OverwritePolicy, Result, RetryPolicy,
};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, warn};

/// What happened to a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was written; carries its size
    Copied(u64),
    /// The file was left alone because of the overwrite policy; carries its size
    Skipped(u64),
}

impl FileOutcome {
    /// Bytes accounted for by this file
    pub fn bytes(self) -> u64 {
        match self {
            Self::Copied(bytes) | Self::Skipped(bytes) => bytes,
        }
    }
}

/// Copies files and directory trees with overwrite, retry and symlink handling
#[derive(Clone)]
pub struct TreeCopier {
    copier: Arc<dyn FileTransfer>,
    retry: RetryPolicy,
    overwrite: OverwritePolicy,
    follow_symlinks: bool,
}

impl fmt::Debug for TreeCopier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeCopier")
            .field("retry", &self.retry)
            .field("overwrite", &self.overwrite)
            .field("follow_symlinks", &self.follow_symlinks)
            .finish_non_exhaustive()
    }
}

impl TreeCopier {
    /// Create a tree copier with default retry, overwrite and symlink behaviour
    pub fn new<T: FileTransfer + 'static>(copier: T) -> Self {
        Self {
            copier: Arc::new(copier),
            retry: RetryPolicy::default(),
            overwrite: OverwritePolicy::Overwrite,
            follow_symlinks: false,
        }
    }

    /// Build a tree copier from per-request options
    ///
    /// The retry budget comes from `options`; `retry` only supplies the backoff.
    pub fn from_options(
        copier: Arc<dyn FileTransfer>,
        options: &CopyOptions,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            copier,
            retry: retry.with_max_retries(options.max_retries),
            overwrite: options.overwrite,
            follow_symlinks: options.follow_symlinks,
        }
    }

    /// Set the retry policy used for each file
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the behaviour for existing destination files
    pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Follow symbolic links instead of recreating them
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Copy one file, applying the overwrite policy and retrying transient failures
    pub async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<FileOutcome> {
        if fs::symlink_metadata(destination).await.is_ok() {
            if is_same_file(source, destination).await {
                return Err(Error::SameFile {
                    path: source.to_path_buf(),
                });
            }
            match self.overwrite {
                OverwritePolicy::Overwrite => {}
                OverwritePolicy::Skip => {
                    let size = fs::metadata(source)
                        .await
                        .map_err(|e| Error::io(source, e))?
                        .len();
                    debug!("Skipping existing {}", destination.display());
                    observer.on_file_skipped(source, size);
                    return Ok(FileOutcome::Skipped(size));
                }
                OverwritePolicy::Prompt => {
                    return Err(Error::DestinationExists {
                        path: destination.to_path_buf(),
                    });
                }
            }
        }

        let mut attempt = 0;
        loop {
            match self
                .copier
                .transfer(source, destination, control, observer)
                .await
            {
                Ok(bytes) => {
                    observer.on_file_copied(source, bytes);
                    return Ok(FileOutcome::Copied(bytes));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let (retry, delay) = self.retry.should_retry(attempt, &e);
                    if !retry || control.is_cancelled() {
                        return Err(e);
                    }
                    warn!(
                        "Copy of {} failed (attempt {}), retrying in {:?}: {}",
                        source.display(),
                        attempt,
                        delay,
                        e
                    );
                    observer.on_retry(source, attempt, delay, &e);
                    control.sleep(delay).await?;
                    observer.on_retry_finished(source);
                }
            }
        }
    }

    /// Copy the contents of `source_dir` into `destination_dir`
    ///
    /// Fails outright only when the root itself cannot be read or created,
    /// when the destination lies inside the source, or on cancellation.
    pub async fn copy(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<CopyStats> {
        let start = Instant::now();
        let source_root = fs::canonicalize(source_dir)
            .await
            .map_err(|e| Error::io(source_dir, e))?;
        if resolve_path(destination_dir).await.starts_with(&source_root) {
            return Err(Error::SameFile {
                path: source_dir.to_path_buf(),
            });
        }

        control.checkpoint(observer).await?;

        let mut stats = CopyStats::new();
        fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| Error::io(destination_dir, e))?;
        observer.on_directory_created(destination_dir);
        stats.directories_created += 1;

        self.copy_children(source_dir, destination_dir, control, observer, &mut stats)
            .await?;

        stats.duration = start.elapsed();
        debug!(
            "Copied tree {} -> {}: {} files, {} bytes, {} errors",
            source_dir.display(),
            destination_dir.display(),
            stats.files_copied,
            stats.bytes_copied,
            stats.errors
        );
        Ok(stats)
    }

    fn copy_children<'a>(
        &'a self,
        source: &'a Path,
        destination: &'a Path,
        control: &'a TaskControl,
        observer: &'a mut dyn CopyObserver,
        stats: &'a mut CopyStats,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = fs::read_dir(source)
                .await
                .map_err(|e| Error::io(source, e))?;
            let mut children = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::io(source, e))?
            {
                children.push(entry.path());
            }
            children.sort();

            for child in children {
                control.checkpoint(observer).await?;

                let Some(name) = child.file_name() else {
                    continue;
                };
                let target = destination.join(name);

                let link_metadata = match fs::symlink_metadata(&child).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        record(observer, stats, &child, &Error::io(&child, e));
                        continue;
                    }
                };

                let metadata = if link_metadata.file_type().is_symlink() {
                    if !self.follow_symlinks {
                        match self.copy_symlink(&child, &target, observer).await {
                            Ok(FileOutcome::Copied(_)) => stats.files_copied += 1,
                            Ok(FileOutcome::Skipped(_)) => stats.files_skipped += 1,
                            Err(e) => record(observer, stats, &child, &e),
                        }
                        continue;
                    }
                    match self.followed_metadata(source, &child).await {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            record(observer, stats, &child, &e);
                            continue;
                        }
                    }
                } else {
                    link_metadata
                };

                if metadata.is_dir() {
                    if let Err(e) = fs::create_dir_all(&target).await {
                        record(observer, stats, &child, &Error::io(&target, e));
                        continue;
                    }
                    observer.on_directory_created(&target);
                    stats.directories_created += 1;

                    match self
                        .copy_children(&child, &target, control, observer, stats)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => record(observer, stats, &child, &e),
                    }
                } else if metadata.is_file() {
                    match self.copy_file(&child, &target, control, observer).await {
                        Ok(FileOutcome::Copied(bytes)) => {
                            stats.files_copied += 1;
                            stats.bytes_copied += bytes;
                        }
                        Ok(FileOutcome::Skipped(_)) => stats.files_skipped += 1,
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => record(observer, stats, &child, &e),
                    }
                } else {
                    warn!("Skipping special file {}", child.display());
                }
            }

            Ok(())
        })
    }

    /// Metadata of a followed link, rejecting dangling links and loops back into an ancestor
    async fn followed_metadata(&self, parent: &Path, link: &Path) -> Result<std::fs::Metadata> {
        let metadata = fs::metadata(link)
            .await
            .map_err(|_| Error::symlink(link, "link target does not exist"))?;

        if metadata.is_dir() {
            let target = fs::canonicalize(link)
                .await
                .map_err(|e| Error::symlink(link, e.to_string()))?;
            let here = fs::canonicalize(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
            if here.starts_with(&target) {
                return Err(Error::symlink(link, "link points back into its own ancestry"));
            }
        }

        Ok(metadata)
    }

    /// Recreate `link` at `target` pointing at the same (possibly relative) path
    async fn copy_symlink(
        &self,
        link: &Path,
        target: &Path,
        observer: &mut dyn CopyObserver,
    ) -> Result<FileOutcome> {
        let points_to = fs::read_link(link)
            .await
            .map_err(|e| Error::symlink(link, e.to_string()))?;
        let resolved = fs::metadata(link).await.map_err(|_| {
            Error::symlink(
                link,
                format!("unresolved link target {}", points_to.display()),
            )
        })?;

        if fs::symlink_metadata(target).await.is_ok() {
            match self.overwrite {
                OverwritePolicy::Overwrite => {
                    fs::remove_file(target)
                        .await
                        .map_err(|e| Error::io(target, e))?;
                }
                OverwritePolicy::Skip => {
                    observer.on_file_skipped(link, 0);
                    return Ok(FileOutcome::Skipped(0));
                }
                OverwritePolicy::Prompt => {
                    return Err(Error::DestinationExists {
                        path: target.to_path_buf(),
                    });
                }
            }
        }

        create_symlink(&points_to, target, resolved.is_dir())
            .await
            .map_err(|e| Error::io(target, e))?;
        observer.on_file_copied(link, 0);
        Ok(FileOutcome::Copied(0))
    }
}

fn record(observer: &mut dyn CopyObserver, stats: &mut CopyStats, path: &Path, error: &Error) {
    warn!("Failed to copy {}: {}", path.display(), error);
    stats.errors += 1;
    observer.on_item_error(ItemError::new(path, error));
}

#[cfg(unix)]
async fn create_symlink(points_to: &Path, link: &Path, _is_dir: bool) -> std::io::Result<()> {
    fs::symlink(points_to, link).await
}

#[cfg(windows)]
async fn create_symlink(points_to: &Path, link: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        fs::symlink_dir(points_to, link).await
    } else {
        fs::symlink_file(points_to, link).await
    }
}

#[cfg(not(any(unix, windows)))]
async fn create_symlink(_points_to: &Path, _link: &Path, _is_dir: bool) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Whether two existing paths name the same file
pub async fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Canonical form of a path that may not exist yet
///
/// The nearest existing ancestor is canonicalized and the missing tail
/// appended unchanged.
pub async fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_relative() {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };

    let mut tail = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(canonical) = fs::canonicalize(current).await {
            return tail
                .iter()
                .rev()
                .fold(canonical, |resolved, part| resolved.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                current = parent;
            }
            _ => return absolute,
        }
    }
}
