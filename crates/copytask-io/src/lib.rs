//! Async copy primitives for copytask
//!
//! This crate does the actual byte moving for the copytask engine:
//!
//! - **Chunked copying**: fixed-size chunks with a pause/cancel checkpoint before each one
//! - **Tree copying**: depth-first directory walks with per-entry error isolation
//! - **Retries**: transient failures are retried with backoff, cancellable mid-wait
//! - **Transfer seam**: [`FileTransfer`] lets callers wrap or replace the per-file copy
//! - **Verification**: optional size or BLAKE3 checksum comparison after each file
//! - **Measurement**: up-front byte and file counts for progress totals
//!
//! # Examples
//!
//! ```rust,no_run
//! use copytask_io::{ChunkCopier, TaskControl, TreeCopier};
//! use copytask_types::NoopObserver;
//! use std::path::Path;
//!
//! # async fn example() -> copytask_types::Result<()> {
//! let control = TaskControl::new();
//! let copier = TreeCopier::new(ChunkCopier::new(1024 * 1024));
//! let stats = copier
//!     .copy(Path::new("photos"), Path::new("/mnt/usb/photos"), &control, &mut NoopObserver)
//!     .await?;
//! println!("Copied {} bytes", stats.bytes_copied);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod control;
pub mod copy;
pub mod scan;
pub mod tree;
pub mod verify;

pub use control::{ControlFlags, TaskControl};
pub use copy::{ChunkCopier, FileTransfer};
pub use scan::{measure_sources, SourceKind, SourceSummary};
pub use tree::{is_same_file, resolve_path, FileOutcome, TreeCopier};
pub use verify::{file_digest, verify_copy};
