//! Configuration management for copytask
//!
//! Settings are layered: built-in defaults, then the first configuration file
//! found (YAML, TOML or JSON), then `COPYTASK__SECTION__KEY` environment
//! variables. The merged result is validated before it is handed out.
//!
//! # Examples
//!
//! ```rust
//! use copytask_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("copytask.yaml")
//!     .add_env_prefix("COPYTASK")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Workers: {}", config.engine.worker_count);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use copytask_types::{BufferSize, CopyOptions, DeviceClass, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "COPYTASK";

/// Main configuration structure for copytask
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task manager settings
    pub engine: EngineConfig,
    /// Default per-request copy options
    pub copy: CopyOptions,
    /// Retry backoff
    pub retry: RetryConfig,
    /// Per device class buffer size overrides
    pub buffers: BufferConfig,
    /// Device classification rules
    pub devices: DeviceConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Request-level defaults for new copy requests
    pub fn copy_options(&self) -> CopyOptions {
        self.copy.clone()
    }

    /// Typed task manager settings
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            worker_count: self.engine.worker_count,
            progress_interval: Duration::from_millis(self.engine.progress_interval_ms),
            history_limit: self.engine.history_limit,
            space_margin_percent: self.engine.space_margin_percent,
            broadcast_capacity: self.engine.broadcast_capacity,
        }
    }

    /// Backoff policy; the retry budget itself comes from each request
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.copy.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
        }
    }
}

/// Task manager configuration as written in files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of tasks copied concurrently
    pub worker_count: usize,
    /// Minimum time between progress snapshots of one task
    pub progress_interval_ms: u64,
    /// Terminal tasks kept for `get`/`list` before the oldest are evicted
    pub history_limit: usize,
    /// Extra free space demanded on top of the source size, in percent
    pub space_margin_percent: u8,
    /// Snapshots buffered per subscriber before the oldest are dropped
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            progress_interval_ms: 250,
            history_limit: 256,
            space_margin_percent: 10,
            broadcast_capacity: 256,
        }
    }
}

/// Task manager settings with typed durations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of tasks copied concurrently
    pub worker_count: usize,
    /// Minimum time between progress snapshots of one task
    pub progress_interval: Duration,
    /// Terminal tasks kept in the index
    pub history_limit: usize,
    /// Free space safety margin in percent
    pub space_margin_percent: u8,
    /// Broadcast channel capacity
    pub broadcast_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Buffer size overrides; unset classes use the built-in recommendation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// USB 2.0 storage
    pub usb2: Option<BufferSize>,
    /// USB 3.x storage
    pub usb3: Option<BufferSize>,
    /// Solid state drives
    pub ssd: Option<BufferSize>,
    /// Hard disk drives
    pub hdd: Option<BufferSize>,
    /// MTP devices
    pub mtp: Option<BufferSize>,
    /// Network shares
    pub network: Option<BufferSize>,
}

impl BufferConfig {
    /// Configured override for a device class
    pub fn get(&self, class: DeviceClass) -> Option<BufferSize> {
        match class {
            DeviceClass::USB2 => self.usb2,
            DeviceClass::USB3 => self.usb3,
            DeviceClass::SSD => self.ssd,
            DeviceClass::HDD => self.hdd,
            DeviceClass::MTP => self.mtp,
            DeviceClass::Network => self.network,
        }
    }

    /// Every configured override
    pub fn overrides(&self) -> Vec<(DeviceClass, BufferSize)> {
        DeviceClass::ALL
            .iter()
            .filter_map(|class| self.get(*class).map(|size| (*class, size)))
            .collect()
    }
}

/// One path prefix classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRule {
    /// Paths under this prefix match the rule
    pub prefix: PathBuf,
    /// Class assigned to matching paths
    pub class: DeviceClass,
}

/// Device classification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Class used when nothing else matches
    pub default_class: DeviceClass,
    /// Consult the system mount table for paths no rule matches
    pub detect_mounts: bool,
    /// Explicit prefix rules; the longest matching prefix wins
    pub rules: Vec<DeviceRule>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_class: DeviceClass::SSD,
            detect_mounts: true,
            rules: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Also write logs to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            log_file: None,
        }
    }
}
