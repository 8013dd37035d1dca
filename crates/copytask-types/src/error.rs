//! Error types and handling for copytask
//!
//! Every failure the engine can observe is an [`Error`]. Errors fall into one of
//! three classes (see [`ErrorClass`]): item-level failures that are recorded and
//! skipped, task-fatal precondition failures, and user-initiated cancellation.

use std::io;
use std::path::{Path, PathBuf};

/// Result type alias for copytask operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error category used in structured item error records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Generic I/O failure
    Io,
    /// Source path does not exist
    NotFound,
    /// Access was denied
    PermissionDenied,
    /// Destination device ran out of space mid-copy
    DiskFull,
    /// Source and destination resolve to the same location
    SameFile,
    /// Destination exists and the overwrite policy asks for a prompt
    DestinationExists,
    /// Symbolic link could not be resolved or recreated
    Symlink,
    /// Post-copy verification mismatch
    Verification,
    /// Up-front free space check failed
    InsufficientSpace,
    /// Request was malformed
    InvalidRequest,
    /// License gate rejected the request
    LicenseLimit,
    /// Unknown task id
    TaskNotFound,
    /// Configuration problem
    Config,
    /// User-initiated cancellation
    Cancelled,
    /// Anything else
    Other,
}

/// Coarse error taxonomy driving how the engine propagates a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// One source entry failed; recorded and the task continues
    Item,
    /// A precondition failed; the task ends `Failed` before copying
    Fatal,
    /// User-initiated; always terminal, never retried
    Cancelled,
}

/// Main error type for copytask operations
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error on '{}': {message}", path.display())]
    Io {
        /// Path the operation was acting on
        path: PathBuf,
        /// Underlying I/O error kind
        kind: io::ErrorKind,
        /// Error message from the I/O operation
        message: String,
    },

    /// File not found
    #[error("File not found: {}", path.display())]
    NotFound {
        /// Path to the file that was not found
        path: PathBuf,
    },

    /// Permission denied
    #[error("Permission denied: {}", path.display())]
    PermissionDenied {
        /// Path to the file with permission issues
        path: PathBuf,
    },

    /// No space left on the destination device
    #[error("No space left on device while writing '{}'", path.display())]
    DiskFull {
        /// Destination path being written
        path: PathBuf,
    },

    /// Source and destination are the same file, or a directory would be copied into itself
    #[error("Source and destination are the same: {}", path.display())]
    SameFile {
        /// Offending source path
        path: PathBuf,
    },

    /// Destination already exists and the overwrite policy requires confirmation
    #[error("Destination already exists: {}", path.display())]
    DestinationExists {
        /// Existing destination path
        path: PathBuf,
    },

    /// Symbolic link problem
    #[error("Symlink error on '{}': {message}", path.display())]
    Symlink {
        /// Link path
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Post-copy verification failed
    #[error("Verification failed for '{}': {message}", path.display())]
    Verification {
        /// Destination path that failed verification
        path: PathBuf,
        /// Mismatch description
        message: String,
    },

    /// Destination does not have enough free space for the whole request
    #[error(
        "Insufficient space on '{}': {required} bytes required, {available} available",
        path.display()
    )]
    InsufficientSpace {
        /// Destination directory
        path: PathBuf,
        /// Bytes required including the safety margin
        required: u64,
        /// Bytes reported free
        available: u64,
    },

    /// Request is malformed
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Reason the request was rejected
        message: String,
    },

    /// License gate refused the request
    #[error("License limit exceeded for {items} items")]
    LicenseLimit {
        /// Number of items in the rejected request
        items: usize,
    },

    /// Task id is not known to the manager
    #[error("Task not found: {id}")]
    TaskNotFound {
        /// The unknown id
        id: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

#[cfg(unix)]
const DISK_FULL_CODES: &[i32] = &[28]; // ENOSPC
#[cfg(windows)]
const DISK_FULL_CODES: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
#[cfg(not(any(unix, windows)))]
const DISK_FULL_CODES: &[i32] = &[];

impl Error {
    /// Convert an I/O error into a path-aware error
    pub fn io(path: impl Into<PathBuf>, error: io::Error) -> Self {
        let path = path.into();
        if error
            .raw_os_error()
            .is_some_and(|code| DISK_FULL_CODES.contains(&code))
        {
            return Self::DiskFull { path };
        }

        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            kind => Self::Io {
                path,
                kind,
                message: error.to_string(),
            },
        }
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DiskFull { .. } => ErrorKind::DiskFull,
            Self::SameFile { .. } => ErrorKind::SameFile,
            Self::DestinationExists { .. } => ErrorKind::DestinationExists,
            Self::Symlink { .. } => ErrorKind::Symlink,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::LicenseLimit { .. } => ErrorKind::LicenseLimit,
            Self::TaskNotFound { .. } => ErrorKind::TaskNotFound,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Classify the error into the item / fatal / cancelled taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cancelled => ErrorClass::Cancelled,
            Self::InsufficientSpace { .. }
            | Self::InvalidRequest { .. }
            | Self::LicenseLimit { .. }
            | Self::TaskNotFound { .. }
            | Self::Config { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Item,
        }
    }

    /// Check if this error may succeed when the same step is attempted again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { kind, .. } => matches!(
                kind,
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Other
            ),
            // Antivirus scanners and indexers briefly lock freshly created files
            Self::PermissionDenied { .. } | Self::Verification { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Path the error refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound { path }
            | Self::PermissionDenied { path }
            | Self::DiskFull { path }
            | Self::SameFile { path }
            | Self::DestinationExists { path }
            | Self::Symlink { path, .. }
            | Self::Verification { path, .. }
            | Self::InsufficientSpace { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new symlink error
    pub fn symlink<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Symlink {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new verification error
    pub fn verification<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Verification {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::io(PathBuf::new(), error)
    }
}

/// Structured record of one source entry that failed and was not recovered
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemError {
    /// Error category, for grouping in a UI
    pub kind: ErrorKind,
    /// Source path that failed
    pub path: PathBuf,
    /// Human readable message
    pub message: String,
}

impl ItemError {
    /// Record an error against a source path
    pub fn new(path: impl Into<PathBuf>, error: &Error) -> Self {
        Self {
            kind: error.kind(),
            path: path.into(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_fatal_errors_are_never_transient(message in ".*", items in 0usize..10_000) {
            let errors = vec![
                Error::invalid_request(message.clone()),
                Error::config(message.clone()),
                Error::LicenseLimit { items },
                Error::InsufficientSpace {
                    path: PathBuf::from("/dst"),
                    required: items as u64 + 1,
                    available: items as u64,
                },
            ];

            for error in errors {
                prop_assert_eq!(error.class(), ErrorClass::Fatal);
                prop_assert!(!error.is_transient());
            }
        }

        #[test]
        fn test_item_error_keeps_kind(message in ".*") {
            let error = Error::verification("/dst/file", message);
            let record = ItemError::new("/src/file", &error);

            prop_assert_eq!(record.kind, ErrorKind::Verification);
            prop_assert_eq!(record.path, PathBuf::from("/src/file"));
            prop_assert_eq!(record.message, error.to_string());
        }
    }

    #[test]
    fn test_io_error_mapping() {
        let not_found = Error::io("/a", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert!(!not_found.is_transient());

        let denied = Error::io("/a", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);
        assert!(denied.is_transient());

        let interrupted = Error::io("/a", io::Error::new(io::ErrorKind::Interrupted, "eintr"));
        assert_eq!(interrupted.kind(), ErrorKind::Io);
        assert!(interrupted.is_transient());
        assert_eq!(interrupted.path(), Some(Path::new("/a")));
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_is_disk_full() {
        let error = Error::io("/dst/big", io::Error::from_raw_os_error(28));
        assert_eq!(error.kind(), ErrorKind::DiskFull);
        assert_eq!(error.class(), ErrorClass::Item);
        assert!(!error.is_transient());
    }

    #[test]
    fn test_cancelled_error() {
        let error = Error::Cancelled;
        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(error.class(), ErrorClass::Cancelled);
        assert!(error.is_cancelled());
        assert!(!error.is_transient());
        assert!(error.path().is_none());
    }

    #[test]
    fn test_same_file_is_not_transient() {
        let error = Error::SameFile {
            path: PathBuf::from("/data"),
        };
        assert_eq!(error.class(), ErrorClass::Item);
        assert!(!error.is_transient());
        assert!(error.to_string().contains("/data"));
    }
}
