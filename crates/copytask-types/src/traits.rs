//! Collaborator seams for copytask
//!
//! The engine does not classify drives, measure free space or validate
//! licenses itself. Those services are injected through the traits below.
//! [`CopyObserver`] is the reverse direction: the copy loops report what
//! they did to whoever drives them.

use crate::{DeviceClass, Error, ItemError};
use std::path::Path;
use std::time::Duration;

/// Maps a path to the coarse class of the device it lives on
pub trait DeviceResolver: Send + Sync {
    /// Classify the device backing `path`
    fn resolve_device_class(&self, path: &Path) -> DeviceClass;
}

/// Reports free space on the filesystem holding a path
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to the current user, or `None` when unknown
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// Gate consulted before a request is accepted
pub trait LicenseGate: Send + Sync {
    /// Whether a request covering `item_count` source entries may proceed
    fn check_license_limit(&self, item_count: usize) -> bool;
}

/// License gate that accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl LicenseGate for Unlimited {
    fn check_license_limit(&self, _item_count: usize) -> bool {
        true
    }
}

/// Space probe that never knows, which disables the up-front space check
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownSpace;

impl SpaceProbe for UnknownSpace {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        None
    }
}

/// Receives events from the file and tree copy loops
///
/// All methods have empty defaults so callers only implement what they need.
pub trait CopyObserver: Send {
    /// Bytes copied so far for the file currently in flight
    fn on_progress(&mut self, _file: &Path, _file_bytes: u64) {}

    /// The copy loop blocked on a pause request (`true`) or resumed (`false`)
    fn on_pause_changed(&mut self, _paused: bool) {}

    /// A file copy failed transiently and will be attempted again after `delay`
    fn on_retry(&mut self, _file: &Path, _attempt: u32, _delay: Duration, _error: &Error) {}

    /// The retry backoff ended and the next attempt is starting
    fn on_retry_finished(&mut self, _file: &Path) {}

    /// A file finished copying
    fn on_file_copied(&mut self, _file: &Path, _bytes: u64) {}

    /// A file was left alone because of the overwrite policy
    fn on_file_skipped(&mut self, _file: &Path, _bytes: u64) {}

    /// A directory was created in the destination tree
    fn on_directory_created(&mut self, _dir: &Path) {}

    /// A source entry failed for good
    fn on_item_error(&mut self, _error: ItemError) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CopyObserver for NoopObserver {}
