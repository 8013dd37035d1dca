//! Path to device class resolution
//!
//! [`PrefixDeviceResolver`] applies configured path-prefix rules first and
//! falls back to a system resolver (the mount table on Linux) and finally to a
//! default class.

use copytask_types::{DeviceClass, DeviceResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Resolves device classes from explicit path-prefix rules
#[derive(Clone)]
pub struct PrefixDeviceResolver {
    rules: Vec<(PathBuf, DeviceClass)>,
    fallback: Option<Arc<dyn DeviceResolver>>,
    default_class: DeviceClass,
}

impl PrefixDeviceResolver {
    /// Resolver returning `default_class` for every path until rules are added
    pub fn new(default_class: DeviceClass) -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
            default_class,
        }
    }

    /// Classify everything under `prefix` as `class`
    pub fn with_rule(mut self, prefix: impl Into<PathBuf>, class: DeviceClass) -> Self {
        self.rules.push((prefix.into(), class));
        self
    }

    /// Consult `fallback` for paths no rule matches
    pub fn with_fallback(mut self, fallback: Arc<dyn DeviceResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl std::fmt::Debug for PrefixDeviceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixDeviceResolver")
            .field("rules", &self.rules)
            .field("fallback", &self.fallback.is_some())
            .field("default_class", &self.default_class)
            .finish()
    }
}

impl DeviceResolver for PrefixDeviceResolver {
    fn resolve_device_class(&self, path: &Path) -> DeviceClass {
        let matched = self
            .rules
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.components().count())
            .map(|(_, class)| *class);

        if let Some(class) = matched {
            return class;
        }
        if let Some(fallback) = &self.fallback {
            return fallback.resolve_device_class(path);
        }
        self.default_class
    }
}

/// One line of a Linux mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Backing device, e.g. `/dev/sda1` or `server:/export`
    pub device: String,
    /// Where it is mounted
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
}

/// Parse `/proc/mounts` formatted text
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount_point = parts.next()?;
            let fs_type = parts.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(mount_point.replace("\\040", " ")),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// The mount entry with the longest mount point containing `path`
pub fn find_mount<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.mount_point))
        .max_by_key(|mount| mount.mount_point.components().count())
}

fn is_network_filesystem(fs_type: &str) -> bool {
    matches!(
        fs_type,
        "nfs" | "nfs4" | "cifs" | "smb" | "smb3" | "smbfs" | "sshfs" | "fuse.sshfs" | "davfs" | "ceph"
    )
}

fn is_mtp_filesystem(fs_type: &str) -> bool {
    matches!(fs_type, "fuse.jmtpfs" | "fuse.simple-mtpfs" | "fuse.go-mtpfs" | "fuse.gvfsd-fuse")
}

/// Classifies paths from the mount table and `/sys/block` on Linux
///
/// Other platforms always get the default class.
#[derive(Debug, Clone)]
pub struct SystemDeviceResolver {
    default_class: DeviceClass,
    mounts_path: PathBuf,
    sys_block: PathBuf,
}

impl SystemDeviceResolver {
    /// Resolver reading the live mount table
    pub fn new(default_class: DeviceClass) -> Self {
        Self {
            default_class,
            mounts_path: PathBuf::from("/proc/mounts"),
            sys_block: PathBuf::from("/sys/block"),
        }
    }

    /// Read the mount table and block device attributes from other locations
    pub fn with_roots(mut self, mounts_path: impl Into<PathBuf>, sys_block: impl Into<PathBuf>) -> Self {
        self.mounts_path = mounts_path.into();
        self.sys_block = sys_block.into();
        self
    }

    fn classify_block_device(&self, device: &str) -> Option<DeviceClass> {
        let name = device.strip_prefix("/dev/")?;
        let base = block_device_base(name);
        let device_dir = self.sys_block.join(base);

        let read_flag = |attribute: &str| {
            std::fs::read_to_string(device_dir.join(attribute))
                .ok()
                .map(|content| content.trim() == "1")
        };

        if read_flag("removable") == Some(true) {
            return Some(DeviceClass::USB3);
        }
        match read_flag("queue/rotational") {
            Some(true) => Some(DeviceClass::HDD),
            Some(false) => Some(DeviceClass::SSD),
            None => None,
        }
    }
}

/// Strip the partition suffix: `sda1` -> `sda`, `nvme0n1p2` -> `nvme0n1`
fn block_device_base(name: &str) -> &str {
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        match name.rfind('p') {
            Some(pos) if pos + 1 < name.len() && name[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
                &name[..pos]
            }
            _ => name,
        }
    } else {
        name.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

impl DeviceResolver for SystemDeviceResolver {
    fn resolve_device_class(&self, path: &Path) -> DeviceClass {
        let Ok(content) = std::fs::read_to_string(&self.mounts_path) else {
            return self.default_class;
        };
        let mounts = parse_mounts(&content);
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let Some(mount) = find_mount(&mounts, &canonical) else {
            return self.default_class;
        };

        let class = if is_network_filesystem(&mount.fs_type) {
            Some(DeviceClass::Network)
        } else if is_mtp_filesystem(&mount.fs_type) {
            Some(DeviceClass::MTP)
        } else {
            self.classify_block_device(&mount.device)
        };

        let class = class.unwrap_or(self.default_class);
        debug!(
            "{} is on {} ({}): {}",
            path.display(),
            mount.mount_point.display(),
            mount.fs_type,
            class
        );
        class
    }
}
