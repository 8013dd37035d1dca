//! Up-front measurement of copy sources

use copytask_types::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// What a source path turned out to be when measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A regular file, or a link to one
    File,
    /// A directory tree
    Directory,
    /// Nothing readable at that path
    Missing,
}

/// Size of one source entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    /// The source path as given
    pub path: PathBuf,
    /// What the path is
    pub kind: SourceKind,
    /// Total bytes of every regular file under the entry
    pub bytes: u64,
    /// Number of files and links under the entry
    pub files: u64,
}

/// Measure every source on a blocking thread
///
/// Unreadable entries inside a tree are left out of the totals rather than
/// failing the scan; the copy itself reports them.
pub async fn measure_sources(sources: Vec<PathBuf>, follow_symlinks: bool) -> Result<Vec<SourceSummary>> {
    tokio::task::spawn_blocking(move || {
        sources
            .iter()
            .map(|path| measure(path, follow_symlinks))
            .collect()
    })
    .await
    .map_err(|e| Error::other(format!("Source scan failed: {e}")))
}

/// Measure a single source synchronously
pub fn measure(path: &Path, follow_symlinks: bool) -> SourceSummary {
    let Ok(metadata) = std::fs::metadata(path) else {
        return SourceSummary {
            path: path.to_path_buf(),
            kind: SourceKind::Missing,
            bytes: 0,
            files: 0,
        };
    };

    if !metadata.is_dir() {
        return SourceSummary {
            path: path.to_path_buf(),
            kind: SourceKind::File,
            bytes: metadata.len(),
            files: 1,
        };
    }

    let mut bytes = 0u64;
    let mut files = 0u64;
    for entry in WalkDir::new(path)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let file_type = entry.file_type();
        if file_type.is_file() {
            files += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        } else if file_type.is_symlink() {
            files += 1;
        }
    }

    debug!("Measured {}: {} files, {} bytes", path.display(), files, bytes);
    SourceSummary {
        path: path.to_path_buf(),
        kind: SourceKind::Directory,
        bytes,
        files,
    }
}
