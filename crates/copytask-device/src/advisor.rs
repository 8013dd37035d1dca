//! Buffer size recommendations per device class
//!
//! Slow or latency-bound media (MTP, USB 2.0, network shares) get small chunks
//! so pause and cancel stay responsive; fast local disks get large ones. A copy
//! between two devices uses the smaller of the two recommendations.

use copytask_types::{BufferSize, DeviceClass, DeviceResolver};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Chooses a chunk size for a source/destination pair
#[derive(Debug, Clone)]
pub struct BufferAdvisor {
    overrides: HashMap<DeviceClass, usize>,
}

impl BufferAdvisor {
    /// Advisor using the built-in sizes
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// Replace the size used for one device class
    pub fn with_override(mut self, class: DeviceClass, size: BufferSize) -> Self {
        self.overrides.insert(class, size.get());
        self
    }

    /// Built-in buffer size for a device class
    pub fn default_size(class: DeviceClass) -> usize {
        match class {
            DeviceClass::MTP => 32 * 1024,
            DeviceClass::USB2 => 64 * 1024,
            DeviceClass::Network => 256 * 1024,
            DeviceClass::HDD => 512 * 1024,
            DeviceClass::USB3 => 1024 * 1024,
            DeviceClass::SSD => 4 * 1024 * 1024,
        }
    }

    /// Buffer size for a single device class, honouring overrides
    pub fn size_for(&self, class: DeviceClass) -> usize {
        self.overrides
            .get(&class)
            .copied()
            .unwrap_or_else(|| Self::default_size(class))
    }

    /// Recommended chunk size for copying between two device classes
    pub fn recommend(&self, source: DeviceClass, destination: DeviceClass) -> usize {
        self.size_for(source).min(self.size_for(destination))
    }

    /// Classify both paths with `resolver` and recommend a chunk size
    pub fn recommend_for_paths(
        &self,
        resolver: &dyn DeviceResolver,
        source: &Path,
        destination: &Path,
    ) -> usize {
        let source_class = resolver.resolve_device_class(source);
        let destination_class = resolver.resolve_device_class(destination);
        let size = self.recommend(source_class, destination_class);
        debug!(
            "Buffer for {} ({}) -> {} ({}): {} bytes",
            source.display(),
            source_class,
            destination.display(),
            destination_class,
            size
        );
        size
    }
}

impl Default for BufferAdvisor {
    fn default() -> Self {
        Self::new()
    }
}
