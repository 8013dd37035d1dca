//! Unified test utilities for copytask tests
//!
//! Deterministic test data, directory tree builders and fake collaborators
//! shared by the integration suite.

use async_trait::async_trait;
use copytask_engine::{Subscription, TaskId, TaskSnapshot};
use copytask_io::{ChunkCopier, FileTransfer, TaskControl};
use copytask_types::{
    CopyObserver, DeviceClass, DeviceResolver, Error, LicenseGate, Result, SpaceProbe,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Test data generation patterns
#[derive(Debug, Clone, Copy)]
pub enum TestDataPattern {
    /// All zeros
    Zeros,
    /// All ones
    Ones,
    /// Deterministic pseudo-random bytes
    Random,
    /// Repeating structured bytes
    Realistic,
}

/// Generate test data with specified pattern
pub fn generate_test_data(size: usize, pattern: TestDataPattern) -> Vec<u8> {
    match pattern {
        TestDataPattern::Zeros => vec![0u8; size],
        TestDataPattern::Ones => vec![0xFFu8; size],
        TestDataPattern::Random => {
            // xorshift keeps the data reproducible across runs
            let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
            (0..size)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state >> 24) as u8
                })
                .collect()
        }
        TestDataPattern::Realistic => (0..size).map(|i| ((i * 7 + 13) % 256) as u8).collect(),
    }
}

/// Create a file with test data, creating parent directories as needed
pub fn create_test_file(path: &Path, size: usize, pattern: TestDataPattern) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, generate_test_data(size, pattern)).expect("Failed to write test file");
    path.to_path_buf()
}

/// Create files of the given sizes under `base`, returning their total size
pub fn create_tree(base: &Path, files: &[(&str, usize)]) -> u64 {
    fs::create_dir_all(base).expect("Failed to create tree root");
    files
        .iter()
        .map(|(name, size)| {
            create_test_file(&base.join(name), *size, TestDataPattern::Random);
            *size as u64
        })
        .sum()
}

/// Assert that every file under `source` exists under `destination` with equal bytes
pub fn assert_trees_equal(source: &Path, destination: &Path) {
    for entry in fs::read_dir(source).expect("Failed to read source directory") {
        let entry = entry.expect("Failed to read directory entry");
        let target = destination.join(entry.file_name());
        if entry.path().is_dir() {
            assert!(target.is_dir(), "missing directory {}", target.display());
            assert_trees_equal(&entry.path(), &target);
        } else {
            assert_files_equal(&entry.path(), &target);
        }
    }
}

/// Assert that two files hold identical bytes
pub fn assert_files_equal(a: &Path, b: &Path) {
    let left = fs::read(a).unwrap_or_else(|e| panic!("read {}: {e}", a.display()));
    let right = fs::read(b).unwrap_or_else(|e| panic!("read {}: {e}", b.display()));
    assert!(left == right, "{} and {} differ", a.display(), b.display());
}

/// Wait for the first snapshot of `id` matching `predicate`
///
/// Panics after `limit` so a broken engine fails the test instead of hanging it.
pub async fn wait_for_snapshot(
    subscription: &mut Subscription,
    id: TaskId,
    limit: Duration,
    mut predicate: impl FnMut(&TaskSnapshot) -> bool,
) -> TaskSnapshot {
    let search = async {
        loop {
            match subscription.recv().await {
                Some(snapshot) if snapshot.id == id && predicate(&snapshot) => return snapshot,
                Some(_) => {}
                None => panic!("broadcaster closed while waiting for task {id}"),
            }
        }
    };
    tokio::time::timeout(limit, search)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for task {id}"))
}

/// Resolver that classifies every path the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedClass(pub DeviceClass);

impl DeviceResolver for FixedClass {
    fn resolve_device_class(&self, _path: &Path) -> DeviceClass {
        self.0
    }
}

/// Space probe reporting a fixed amount of free space
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

/// License gate allowing at most this many items per request
#[derive(Debug, Clone, Copy)]
pub struct MaxItems(pub usize);

impl LicenseGate for MaxItems {
    fn check_license_limit(&self, item_count: usize) -> bool {
        item_count <= self.0
    }
}

/// Failure plan for [`FlakyTransfer`]
#[derive(Debug, Clone, Default)]
pub struct Flakiness {
    /// Failed attempts per file before the real copy runs
    pub failures: u32,
    /// Progress each failed attempt reports before it fails
    pub partial_bytes: u64,
    /// Only files with this name fail; every file when `None`
    pub file_name: Option<String>,
}

impl Flakiness {
    /// Fail every file `failures` times
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Report `bytes` of progress from each failed attempt
    pub fn with_partial_bytes(mut self, bytes: u64) -> Self {
        self.partial_bytes = bytes;
        self
    }

    /// Restrict failures to files called `name`
    pub fn only(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_string());
        self
    }

    /// Transfer layer for [`copytask_engine::TaskManagerBuilder::with_transfer_layer`]
    pub fn layer(self) -> impl Fn(ChunkCopier) -> Arc<dyn FileTransfer> + Send + Sync + 'static {
        move |copier| -> Arc<dyn FileTransfer> { Arc::new(FlakyTransfer::new(copier, self.clone())) }
    }
}

/// Transfer that times out a planned number of times per file before copying
#[derive(Debug)]
pub struct FlakyTransfer {
    inner: ChunkCopier,
    plan: Flakiness,
    attempts: Mutex<HashMap<PathBuf, u32>>,
}

impl FlakyTransfer {
    /// Wrap `inner` with the failures in `plan`
    pub fn new(inner: ChunkCopier, plan: Flakiness) -> Self {
        Self {
            inner,
            plan,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn applies_to(&self, source: &Path) -> bool {
        self.plan
            .file_name
            .as_deref()
            .map_or(true, |name| source.file_name().is_some_and(|n| n == name))
    }
}

#[async_trait]
impl FileTransfer for FlakyTransfer {
    async fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        control: &TaskControl,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64> {
        if self.applies_to(source) {
            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempt counter poisoned");
                let count = attempts.entry(source.to_path_buf()).or_insert(0);
                *count += 1;
                *count
            };
            if attempt <= self.plan.failures {
                if self.plan.partial_bytes > 0 {
                    observer.on_progress(source, self.plan.partial_bytes);
                }
                return Err(Error::io(
                    source,
                    io::Error::new(io::ErrorKind::TimedOut, "device busy"),
                ));
            }
        }
        self.inner
            .transfer(source, destination, control, observer)
            .await
    }
}

/// Common file sizes for tests
pub struct CommonFileSizes;

impl CommonFileSizes {
    /// 1 KiB
    pub const TINY: usize = 1024;
    /// 64 KiB
    pub const MEDIUM: usize = 64 * 1024;
    /// 1 MiB
    pub const LARGE: usize = 1024 * 1024;
    /// 10 MiB
    pub const XLARGE: usize = 10 * 1024 * 1024;
    /// 64 MiB, large enough to interrupt mid-copy with small chunks
    pub const HUGE: usize = 64 * 1024 * 1024;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_test_data_patterns() {
        let size = 1024;
        assert!(generate_test_data(size, TestDataPattern::Zeros).iter().all(|&b| b == 0));
        assert!(generate_test_data(size, TestDataPattern::Ones).iter().all(|&b| b == 0xFF));

        let random = generate_test_data(size, TestDataPattern::Random);
        assert_eq!(random.len(), size);
        assert_eq!(random, generate_test_data(size, TestDataPattern::Random));
        assert!(random.iter().any(|&b| b != random[0]));
    }

    #[tokio::test]
    async fn test_flaky_transfer_fails_only_named_file() {
        let temp_dir = TempDir::new().unwrap();
        let good = create_test_file(&temp_dir.path().join("good.bin"), 10, TestDataPattern::Ones);
        let bad = create_test_file(&temp_dir.path().join("bad.bin"), 10, TestDataPattern::Ones);

        let plan = Flakiness::failing(1).only("bad.bin");
        let flaky = FlakyTransfer::new(ChunkCopier::new(4096), plan);
        let control = TaskControl::new();
        let mut observer = copytask_types::NoopObserver;

        let copied = flaky
            .transfer(&good, &temp_dir.path().join("good.copy"), &control, &mut observer)
            .await
            .unwrap();
        assert_eq!(copied, 10);

        let target = temp_dir.path().join("bad.copy");
        let first = flaky.transfer(&bad, &target, &control, &mut observer).await;
        assert!(first.unwrap_err().is_transient());
        assert_eq!(flaky.transfer(&bad, &target, &control, &mut observer).await.unwrap(), 10);
    }

    #[test]
    fn test_create_tree_and_compare() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let total = create_tree(&source, &[("a.bin", 100), ("nested/b.bin", 200)]);
        assert_eq!(total, 300);

        let copy = temp_dir.path().join("copy");
        create_tree(&copy, &[]);
        fs::create_dir_all(copy.join("nested")).unwrap();
        fs::copy(source.join("a.bin"), copy.join("a.bin")).unwrap();
        fs::copy(source.join("nested/b.bin"), copy.join("nested/b.bin")).unwrap();
        assert_trees_equal(&source, &copy);
    }
}
