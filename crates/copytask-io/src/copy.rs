//! Chunked single-file copying

use crate::verify::verify_copy;
use crate::TaskControl;
use async_trait::async_trait;
use copytask_types::{BufferSize, CopyObserver, Error, Result, VerifyMode};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Moves the bytes of one regular file
///
/// [`TreeCopier`](crate::TreeCopier) calls this once per attempt and retries
/// transient failures, so every call must start the file over from the
/// beginning. Progress reported by a failed attempt may be reported again.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `source` to `destination`, returning the bytes written
    async fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64>;
}

/// Copies one file chunk by chunk, honouring pause and cancel between chunks
///
/// A cancelled copy leaves the partially written destination in place.
#[derive(Debug, Clone)]
pub struct ChunkCopier {
    buffer_size: usize,
    progress_interval: Duration,
    preserve_timestamps: bool,
    verify: VerifyMode,
}

impl ChunkCopier {
    /// Create a copier reading and writing `buffer_size` bytes at a time
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(BufferSize::MIN),
            progress_interval: Duration::from_millis(250),
            preserve_timestamps: true,
            verify: VerifyMode::Off,
        }
    }

    /// Minimum time between intermediate progress reports
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Copy access and modification times after writing
    pub fn with_preserve_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    /// Verification performed once the file is written
    pub fn with_verify(mut self, verify: VerifyMode) -> Self {
        self.verify = verify;
        self
    }

    /// Chunk size in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Copy `source` to `destination`, truncating any existing destination
    ///
    /// Progress is reported to `observer` as the running byte count of this
    /// file, at most once per progress interval plus once at the end.
    /// Returns the number of bytes written.
    pub async fn copy(
        &self,
        source: &Path,
        destination: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64> {
        control.checkpoint(observer).await?;

        let metadata = fs::metadata(source)
            .await
            .map_err(|e| Error::io(source, e))?;

        debug!(
            "Copying {} -> {} ({} bytes, chunk {})",
            source.display(),
            destination.display(),
            metadata.len(),
            self.buffer_size
        );

        let mut reader = fs::File::open(source)
            .await
            .map_err(|e| Error::io(source, e))?;
        let mut writer = fs::File::create(destination)
            .await
            .map_err(|e| Error::io(destination, e))?;

        let mut buffer = vec![0u8; self.buffer_size];
        let mut copied = 0u64;
        let mut last_report = Instant::now();

        loop {
            if let Err(e) = control.checkpoint(observer).await {
                // Push out whatever is buffered so the partial file is consistent
                let _ = writer.flush().await;
                return Err(e);
            }

            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| Error::io(source, e))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| Error::io(destination, e))?;
            copied += read as u64;

            if last_report.elapsed() >= self.progress_interval {
                trace!("{}: {} bytes", source.display(), copied);
                observer.on_progress(source, copied);
                last_report = Instant::now();
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| Error::io(destination, e))?;
        drop(writer);
        observer.on_progress(source, copied);

        if self.preserve_timestamps {
            preserve_times(&metadata, destination)?;
        }

        verify_copy(source, destination, self.verify).await?;

        Ok(copied)
    }
}

#[async_trait]
impl FileTransfer for ChunkCopier {
    async fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64> {
        self.copy(source, destination, control, observer).await
    }
}

fn preserve_times(source: &std::fs::Metadata, destination: &Path) -> Result<()> {
    let accessed = source.accessed().unwrap_or_else(|_| SystemTime::now());
    let modified = source.modified().unwrap_or_else(|_| SystemTime::now());

    filetime::set_file_times(
        destination,
        filetime::FileTime::from_system_time(accessed),
        filetime::FileTime::from_system_time(modified),
    )
    .map_err(|e| Error::io(destination, e))
}
