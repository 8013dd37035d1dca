//! Core type system and error handling for copytask
//!
//! This crate provides the foundational types shared by every copytask crate:
//!
//! - **Error handling**: structured errors split into item, fatal and cancellation classes
//! - **Core types**: device classes, per-request copy options and copy statistics
//! - **Retry policy**: bounded, growing backoff for transient failures
//! - **Traits**: seams for the drive classifier, free-space probe, license gate
//!   and copy progress observers
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use copytask_types::{Error, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = Error::DiskFull { path: "/dst/movie.mkv".into() };
//! assert_eq!(policy.should_retry(1, &error).0, false);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{BufferSize, RetryPolicy};
pub use error::{Error, ErrorClass, ErrorKind, ItemError, Result};
pub use traits::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_stats_merge() {
        let mut stats1 = CopyStats::new();
        stats1.files_copied = 5;
        stats1.bytes_copied = 1000;

        let mut stats2 = CopyStats::new();
        stats2.files_copied = 3;
        stats2.bytes_copied = 500;
        stats2.errors = 1;

        stats1.merge(&stats2);
        assert_eq!(stats1.files_copied, 8);
        assert_eq!(stats1.bytes_copied, 1500);
        assert_eq!(stats1.errors, 1);
    }

    #[test]
    fn test_unlimited_license_gate() {
        assert!(Unlimited.check_license_limit(0));
        assert!(Unlimited.check_license_limit(usize::MAX));
    }

    #[test]
    fn test_unknown_space_probe() {
        assert_eq!(UnknownSpace.available_space(std::path::Path::new("/")), None);
    }
}
