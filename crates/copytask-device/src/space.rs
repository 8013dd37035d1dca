//! Free space probing

use copytask_types::SpaceProbe;
use std::path::Path;
use tracing::debug;

/// Reads free space from the operating system
///
/// Uses `statvfs` on Unix. On other platforms free space is reported as
/// unknown, which skips the up-front space check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        // The destination may not exist yet; measure the nearest existing ancestor
        let existing = path.ancestors().find(|p| p.exists())?;
        let available = available_bytes(existing);
        debug!("Free space at {}: {:?}", existing.display(), available);
        available
    }
}

#[cfg(unix)]
fn available_bytes(path: &Path) -> Option<u64> {
    let stats = nix::sys::statvfs::statvfs(path).ok()?;
    Some(u64::from(stats.blocks_available()) * u64::from(stats.fragment_size()))
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Option<u64> {
    None
}

/// Bytes needed to copy `total_bytes` with a `margin_percent` safety margin
pub fn required_with_margin(total_bytes: u64, margin_percent: u8) -> u64 {
    let margin = total_bytes / 100 * u64::from(margin_percent)
        + total_bytes % 100 * u64::from(margin_percent) / 100;
    total_bytes.saturating_add(margin)
}
