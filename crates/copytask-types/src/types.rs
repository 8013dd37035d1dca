//! Core data types for copytask
//!
//! Device classification, per-request copy options and aggregated copy statistics.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::BufferSize;

/// Coarse storage classification used to pick an I/O buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceClass {
    /// USB 2.0 attached storage
    USB2,
    /// USB 3.x attached storage
    USB3,
    /// Solid State Drive
    SSD,
    /// Hard Disk Drive
    HDD,
    /// Media Transfer Protocol device (phones, cameras)
    MTP,
    /// Network share
    Network,
}

impl DeviceClass {
    /// Every device class, slowest buffer first
    pub const ALL: [DeviceClass; 6] = [
        DeviceClass::MTP,
        DeviceClass::USB2,
        DeviceClass::Network,
        DeviceClass::HDD,
        DeviceClass::USB3,
        DeviceClass::SSD,
    ];

    /// Lowercase name as used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            Self::USB2 => "usb2",
            Self::USB3 => "usb3",
            Self::SSD => "ssd",
            Self::HDD => "hdd",
            Self::MTP => "mtp",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usb2" => Ok(Self::USB2),
            "usb3" => Ok(Self::USB3),
            "ssd" => Ok(Self::SSD),
            "hdd" => Ok(Self::HDD),
            "mtp" => Ok(Self::MTP),
            "network" | "net" => Ok(Self::Network),
            other => Err(format!("Unknown device class '{}'", other)),
        }
    }
}

/// What to do when a destination file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OverwritePolicy {
    /// Ask the user; the engine records the conflict as an item error
    Prompt,
    /// Replace the existing file
    #[default]
    Overwrite,
    /// Leave the existing file untouched
    Skip,
}

/// Post-copy verification strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VerifyMode {
    /// No verification
    #[default]
    Off,
    /// Compare byte lengths of source and destination
    Size,
    /// Compare content hashes of source and destination
    Checksum,
}

/// Per-request configuration bag
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CopyOptions {
    /// Verification performed after each file is written
    pub verify: VerifyMode,
    /// Copy access and modification times onto the destination
    pub preserve_timestamps: bool,
    /// Behaviour when the destination file exists
    pub overwrite: OverwritePolicy,
    /// Retries per file for transient errors
    pub max_retries: u32,
    /// Follow symbolic links instead of recreating them
    pub follow_symlinks: bool,
    /// Fixed buffer size; bypasses the device-based recommendation
    pub chunk_size: Option<BufferSize>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            verify: VerifyMode::Off,
            preserve_timestamps: true,
            overwrite: OverwritePolicy::Overwrite,
            max_retries: 3,
            follow_symlinks: false,
            chunk_size: None,
        }
    }
}

/// Copy statistics aggregated over one file or one tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CopyStats {
    /// Number of files copied
    pub files_copied: u64,
    /// Number of files left alone because of the overwrite policy
    pub files_skipped: u64,
    /// Number of directories created
    pub directories_created: u64,
    /// Total bytes copied
    pub bytes_copied: u64,
    /// Number of item errors recorded
    pub errors: u64,
    /// Total duration of the operation
    pub duration: Duration,
}

impl CopyStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate the overall transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Whether anything at all was copied or deliberately skipped
    pub fn made_progress(&self) -> bool {
        self.files_copied > 0 || self.files_skipped > 0 || self.directories_created > 0
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &CopyStats) {
        self.files_copied += other.files_copied;
        self.files_skipped += other.files_skipped;
        self.directories_created += other.directories_created;
        self.bytes_copied += other.bytes_copied;
        self.errors += other.errors;
        self.duration += other.duration;
    }
}
