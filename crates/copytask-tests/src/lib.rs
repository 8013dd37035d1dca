//! copytask testing support
//!
//! Shared helpers for the end-to-end suite in `tests/integration_tests.rs`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Concurrency testing utilities
///
/// Replays snapshot streams to check pool bounds and publish ordering.
pub mod concurrency_utils;

/// Unified test utilities
///
/// Test data, tree builders and fake collaborators.
pub mod test_utils;
