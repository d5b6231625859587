//! Scratch directories for unit tests.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

// Counter to ensure unique directories even in parallel execution
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Temporary directory removed on drop.
pub struct TestDir(PathBuf);

impl TestDir {
    pub fn new(label: &str) -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        let path = env::temp_dir().join(format!("fw-release-test-{}-{}-{}", label, pid, id));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("Failed to create test dir");
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Write `contents` to `name` inside the directory and return its path.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.0.join(name);
        fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// Write the three prerequisite binaries with the given sizes.
    pub fn write_build_outputs(&self, bootloader: usize, partitions: usize, app: usize) {
        self.write("bootloader.bin", &vec![0xB0; bootloader]);
        self.write("partitions.bin", &vec![0xAA; partitions]);
        self.write("firmware.bin", &pattern(app));
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Non-repeating-looking test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
