//! Shared helpers for meldbox integration tests.
#![allow(dead_code)] // Not every test file uses every helper

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use meldbox::config::Config;
use meldbox::provision::ProvisionContext;

/// Test environment with temporary staging and downloads directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    _temp_dir: TempDir,
    /// Image root under construction
    pub staging: PathBuf,
    /// Artifact cache
    pub downloads: PathBuf,
    /// Base directory (project root simulation)
    pub base_dir: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let staging = base.join("image");
        let downloads = base.join("downloads");
        fs::create_dir_all(&staging).expect("Failed to create staging dir");
        fs::create_dir_all(&downloads).expect("Failed to create downloads dir");

        Self {
            base_dir: base.to_path_buf(),
            _temp_dir: temp_dir,
            staging,
            downloads,
        }
    }

    /// Create a provisioning context for this environment.
    pub fn context(&self) -> ProvisionContext {
        ProvisionContext::for_testing(
            &self.staging,
            &self.downloads,
            &self.base_dir,
            Config::load(&self.base_dir),
        )
    }
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}
