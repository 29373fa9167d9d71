//! Configuration management for meldbox.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the pinned defaults in
//! `artifact`.

use std::env;
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactSet;

/// meldbox configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Image staging root (default: output/image)
    pub staging_dir: PathBuf,
    /// Downloaded-artifact cache (default: downloads)
    pub downloads_dir: PathBuf,
    /// Pinned external artifacts.
    pub artifacts: ArtifactSet,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `.env` is loaded by main before this runs, so overrides from either
    /// source land in the process environment. Relative path overrides are
    /// resolved against `base_dir`.
    pub fn load(base_dir: &Path) -> Self {
        let staging_dir = env::var("MELDBOX_STAGING")
            .map(|s| resolve_path(base_dir, &s))
            .unwrap_or_else(|_| base_dir.join("output/image"));

        let downloads_dir = env::var("MELDBOX_DOWNLOADS")
            .map(|s| resolve_path(base_dir, &s))
            .unwrap_or_else(|_| base_dir.join("downloads"));

        Self {
            staging_dir,
            downloads_dir,
            artifacts: ArtifactSet::from_env(),
        }
    }

    /// Print configuration for `meldbox show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Staging:    {}", self.staging_dir.display());
        println!("  Downloads:  {}", self.downloads_dir.display());
        println!(
            "  Miniconda:  {} ({})",
            self.artifacts.conda.version, self.artifacts.conda.filename
        );
        println!(
            "  FreeSurfer: {} -> /{}",
            self.artifacts.freesurfer.version,
            self.artifacts.freesurfer.install_dir()
        );
        println!(
            "  FastSurfer: {} @ {}",
            self.artifacts.fastsurfer.git_url, self.artifacts.fastsurfer.tag
        );
        println!(
            "  meld_graph: {} @ {}",
            self.artifacts.meld.git_url, self.artifacts.meld.branch
        );
    }
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_paths() {
        env::remove_var("MELDBOX_STAGING");
        env::remove_var("MELDBOX_DOWNLOADS");

        let config = Config::load(Path::new("/work"));
        assert_eq!(config.staging_dir, PathBuf::from("/work/output/image"));
        assert_eq!(config.downloads_dir, PathBuf::from("/work/downloads"));
    }

    #[test]
    #[serial]
    fn test_staging_override_absolute() {
        env::set_var("MELDBOX_STAGING", "/scratch/image");
        let config = Config::load(Path::new("/work"));
        env::remove_var("MELDBOX_STAGING");

        assert_eq!(config.staging_dir, PathBuf::from("/scratch/image"));
    }

    #[test]
    #[serial]
    fn test_downloads_override_relative() {
        env::set_var("MELDBOX_DOWNLOADS", "cache/artifacts");
        let config = Config::load(Path::new("/work"));
        env::remove_var("MELDBOX_DOWNLOADS");

        assert_eq!(config.downloads_dir, PathBuf::from("/work/cache/artifacts"));
    }
}
