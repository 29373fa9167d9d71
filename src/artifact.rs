//! Pinned external artifacts and their resolution.
//!
//! Every third-party piece of the image (Miniconda installer, FreeSurfer
//! tarball, FastSurfer and meld_graph repositories) is described by a config
//! struct with exact, reproducible locators. Archives carry a mandatory
//! SHA256 digest; git repositories carry an exact tag or branch. A config
//! without a complete pin is rejected before provisioning starts.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::fetch::{self, DownloadOptions};

// =============================================================================
// Miniconda installer
// =============================================================================

/// Default Miniconda installer pin.
pub mod conda_defaults {
    pub const VERSION: &str = "py39_4.12.0";
    pub const FILENAME: &str = "Miniconda3-py39_4.12.0-Linux-x86_64.sh";
    pub const URL: &str =
        "https://repo.anaconda.com/miniconda/Miniconda3-py39_4.12.0-Linux-x86_64.sh";
    pub const SHA256: &str = "78f39f9bae971ec1ae7969f0516017f2413f17796670f7040725dd83fcff5689";
    pub const SIZE_BYTES: u64 = 76_607_678; // ~73 MiB
    /// Install prefix inside the image root.
    pub const PREFIX: &str = "opt/conda";
}

/// Miniconda installer configuration.
#[derive(Debug, Clone)]
pub struct CondaConfig {
    pub version: String,
    pub url: String,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub prefix: String,
}

impl Default for CondaConfig {
    fn default() -> Self {
        Self {
            version: conda_defaults::VERSION.to_string(),
            url: conda_defaults::URL.to_string(),
            filename: conda_defaults::FILENAME.to_string(),
            sha256: conda_defaults::SHA256.to_string(),
            size_bytes: conda_defaults::SIZE_BYTES,
            prefix: conda_defaults::PREFIX.to_string(),
        }
    }
}

impl CondaConfig {
    /// Load config from environment variables, falling back to the pins.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            version: env::var("CONDA_VERSION").unwrap_or(defaults.version),
            url: env::var("CONDA_URL").unwrap_or(defaults.url),
            filename: env::var("CONDA_FILENAME").unwrap_or(defaults.filename),
            sha256: env::var("CONDA_SHA256").unwrap_or(defaults.sha256),
            size_bytes: env::var("CONDA_SIZE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.size_bytes),
            prefix: defaults.prefix,
        }
    }
}

// =============================================================================
// FreeSurfer tarball
// =============================================================================

/// Default FreeSurfer pin.
pub mod freesurfer_defaults {
    pub const VERSION: &str = "7.2.0";
    pub const FILENAME: &str = "freesurfer-linux-centos7_x86_64-7.2.0.tar.gz";
    pub const URL: &str =
        "https://surfer.nmr.mgh.harvard.edu/pub/dist/freesurfer/7.2.0/freesurfer-linux-centos7_x86_64-7.2.0.tar.gz";
    pub const SHA256: &str = "4cca78602f898bf336f0f913fd07dbafc8eef3e72d78f9eccfa0b38c10e04395";
    pub const SIZE_BYTES: u64 = 9_341_231_104; // ~8.7 GiB
    pub const SIZE: &str = "8.7GB";

    /// Archive members skipped during extraction. Training data, CUDA/Qt
    /// libraries and unused subject templates are dead weight for the MELD
    /// pipeline and dominate the unpacked size.
    pub const EXCLUDES: &[&str] = &[
        "freesurfer/trctrain",
        "freesurfer/subjects/fsaverage3",
        "freesurfer/subjects/fsaverage4",
        "freesurfer/subjects/fsaverage5",
        "freesurfer/subjects/fsaverage6",
        "freesurfer/subjects/cvs_avg35",
        "freesurfer/subjects/cvs_avg35_inMNI152",
        "freesurfer/subjects/bert",
        "freesurfer/subjects/V1_average",
        "freesurfer/average/mult-comp-cor",
        "freesurfer/lib/cuda",
        "freesurfer/lib/qt",
    ];
}

/// FreeSurfer tarball configuration.
#[derive(Debug, Clone)]
pub struct FreeSurferConfig {
    pub version: String,
    pub url: String,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub excludes: Vec<String>,
}

impl Default for FreeSurferConfig {
    fn default() -> Self {
        Self {
            version: freesurfer_defaults::VERSION.to_string(),
            url: freesurfer_defaults::URL.to_string(),
            filename: freesurfer_defaults::FILENAME.to_string(),
            sha256: freesurfer_defaults::SHA256.to_string(),
            size_bytes: freesurfer_defaults::SIZE_BYTES,
            excludes: freesurfer_defaults::EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FreeSurferConfig {
    /// Load config from environment variables, falling back to the pins.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            version: env::var("FREESURFER_VERSION").unwrap_or(defaults.version),
            url: env::var("FREESURFER_URL").unwrap_or(defaults.url),
            filename: env::var("FREESURFER_FILENAME").unwrap_or(defaults.filename),
            sha256: env::var("FREESURFER_SHA256").unwrap_or(defaults.sha256),
            size_bytes: env::var("FREESURFER_SIZE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.size_bytes),
            excludes: defaults.excludes,
        }
    }

    /// Versioned install directory, relative to the image root.
    pub fn install_dir(&self) -> String {
        format!("opt/freesurfer-{}", self.version)
    }

    /// Absolute install path as seen from inside the image.
    pub fn image_home(&self) -> String {
        format!("/opt/freesurfer-{}", self.version)
    }
}

// =============================================================================
// FastSurfer repository
// =============================================================================

/// Default FastSurfer pin.
pub mod fastsurfer_defaults {
    pub const GIT_URL: &str = "https://github.com/Deep-MI/FastSurfer.git";
    /// Exact release tag.
    pub const TAG: &str = "v2.2.0";
    pub const ENV_FILE: &str = "fastsurfer_env_cpu.yml";
    pub const ENV_NAME: &str = "fastsurfer_cpu";
}

/// FastSurfer repository configuration.
#[derive(Debug, Clone)]
pub struct FastSurferConfig {
    pub git_url: String,
    pub tag: String,
    pub env_file: String,
    pub env_name: String,
}

impl Default for FastSurferConfig {
    fn default() -> Self {
        Self {
            git_url: fastsurfer_defaults::GIT_URL.to_string(),
            tag: fastsurfer_defaults::TAG.to_string(),
            env_file: fastsurfer_defaults::ENV_FILE.to_string(),
            env_name: fastsurfer_defaults::ENV_NAME.to_string(),
        }
    }
}

impl FastSurferConfig {
    /// Load config from environment variables, falling back to the pins.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            git_url: env::var("FASTSURFER_GIT_URL").unwrap_or(defaults.git_url),
            tag: env::var("FASTSURFER_TAG").unwrap_or(defaults.tag),
            env_file: env::var("FASTSURFER_ENV_FILE").unwrap_or(defaults.env_file),
            env_name: defaults.env_name,
        }
    }

    /// Versioned install directory, relative to the image root.
    pub fn install_dir(&self) -> String {
        format!("opt/fastsurfer-{}", self.tag)
    }

    /// Checkpoint cache written by FastSurfer at runtime. The container
    /// user is not the directory owner, so writability is established
    /// explicitly during provisioning.
    pub fn cache_dir(&self) -> String {
        format!("{}/checkpoints", self.install_dir())
    }

    /// Absolute install path as seen from inside the image.
    pub fn image_home(&self) -> String {
        format!("/{}", self.install_dir())
    }
}

// =============================================================================
// meld_graph repository
// =============================================================================

/// Default meld_graph pin.
pub mod meld_defaults {
    pub const GIT_URL: &str = "https://github.com/MELDProject/meld_graph.git";
    /// Named release branch. The project cuts container releases from this
    /// branch rather than tags.
    pub const BRANCH: &str = "docker";
    pub const INSTALL_DIR: &str = "opt/meld_graph";
    pub const ENV_FILE: &str = "environment.yml";
    pub const ENV_NAME: &str = "meld_graph";
    /// Bind-mount point for subject data inside the image.
    pub const DATA_DIR: &str = "data";
    /// FreeSurfer license location the pipeline expects at runtime.
    pub const LICENSE_PATH: &str = "/license.txt";
    /// Startup script, relative to the install dir.
    pub const ENTRYPOINT: &str = "entrypoint.sh";
}

/// meld_graph repository configuration.
#[derive(Debug, Clone)]
pub struct MeldGraphConfig {
    pub git_url: String,
    pub branch: String,
    pub install_dir: String,
    pub env_file: String,
    pub env_name: String,
    pub data_dir: String,
    pub license_path: String,
    pub entrypoint: String,
}

impl Default for MeldGraphConfig {
    fn default() -> Self {
        Self {
            git_url: meld_defaults::GIT_URL.to_string(),
            branch: meld_defaults::BRANCH.to_string(),
            install_dir: meld_defaults::INSTALL_DIR.to_string(),
            env_file: meld_defaults::ENV_FILE.to_string(),
            env_name: meld_defaults::ENV_NAME.to_string(),
            data_dir: meld_defaults::DATA_DIR.to_string(),
            license_path: meld_defaults::LICENSE_PATH.to_string(),
            entrypoint: meld_defaults::ENTRYPOINT.to_string(),
        }
    }
}

impl MeldGraphConfig {
    /// Load config from environment variables, falling back to the pins.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            git_url: env::var("MELD_GIT_URL").unwrap_or(defaults.git_url),
            branch: env::var("MELD_BRANCH").unwrap_or(defaults.branch),
            install_dir: defaults.install_dir,
            env_file: env::var("MELD_ENV_FILE").unwrap_or(defaults.env_file),
            env_name: defaults.env_name,
            data_dir: defaults.data_dir,
            license_path: env::var("MELD_LICENSE_PATH").unwrap_or(defaults.license_path),
            entrypoint: defaults.entrypoint,
        }
    }

    /// Absolute install path as seen from inside the image.
    pub fn image_home(&self) -> String {
        format!("/{}", self.install_dir)
    }
}

// =============================================================================
// Pin validation
// =============================================================================

/// Refs that would make a clone unreproducible.
const FLOATING_REFS: &[&str] = &["", "latest", "HEAD", "master", "main"];

fn check_sha256(what: &str, sha256: &str) -> Result<()> {
    if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!(
            "{} has no usable SHA256 pin ('{}'). Archive downloads must carry \
             an exact digest.",
            what,
            sha256
        );
    }
    Ok(())
}

fn check_ref(what: &str, reference: &str) -> Result<()> {
    if FLOATING_REFS.contains(&reference) {
        bail!(
            "{} is pinned to floating ref '{}'. Use an exact tag or release branch.",
            what,
            reference
        );
    }
    Ok(())
}

/// The full pinned artifact set for one image build.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub conda: CondaConfig,
    pub freesurfer: FreeSurferConfig,
    pub fastsurfer: FastSurferConfig,
    pub meld: MeldGraphConfig,
}

impl ArtifactSet {
    /// Load all artifact configs from the environment.
    pub fn from_env() -> Self {
        Self {
            conda: CondaConfig::from_env(),
            freesurfer: FreeSurferConfig::from_env(),
            fastsurfer: FastSurferConfig::from_env(),
            meld: MeldGraphConfig::from_env(),
        }
    }

    /// Verify every locator is exact and reproducible.
    ///
    /// Rejecting incomplete pins up front keeps a typo in an override from
    /// surfacing hours into a build.
    pub fn validate(&self) -> Result<()> {
        check_sha256("Miniconda installer", &self.conda.sha256)?;
        check_sha256("FreeSurfer tarball", &self.freesurfer.sha256)?;

        if self.conda.version.is_empty() {
            bail!("Miniconda version pin is empty");
        }
        if self.freesurfer.version.is_empty() {
            bail!("FreeSurfer version pin is empty");
        }

        check_ref("FastSurfer", &self.fastsurfer.tag)?;
        check_ref("meld_graph", &self.meld.branch)?;
        Ok(())
    }
}

// =============================================================================
// Archive resolution
// =============================================================================

/// How an archive was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Found in the downloads directory with a matching digest.
    ExistingDownload,
    /// Downloaded via HTTP.
    Http,
}

/// A resolved, digest-verified archive on disk.
#[derive(Debug, Clone)]
pub struct ResolvedArchive {
    pub path: PathBuf,
    pub source: ArchiveSource,
}

/// Resolve an archive into the downloads directory, downloading if needed.
///
/// An existing file is revalidated against the pinned digest; a mismatch
/// deletes the file and triggers a fresh download. The returned path has
/// always passed verification.
pub fn resolve_archive(
    downloads_dir: &Path,
    filename: &str,
    url: &str,
    sha256: &str,
    size_bytes: u64,
) -> Result<ResolvedArchive> {
    check_sha256(filename, sha256)?;

    let dest = downloads_dir.join(filename);

    if dest.exists() {
        println!("  {}: existing download, verifying digest...", filename);
        match fetch::verify_sha256(&dest, sha256, true) {
            Ok(()) => {
                println!("  Digest OK");
                return Ok(ResolvedArchive {
                    path: dest,
                    source: ArchiveSource::ExistingDownload,
                });
            }
            Err(e) => {
                println!("  Digest FAILED ({e:#}) - removing corrupted file");
                std::fs::remove_file(&dest).with_context(|| {
                    format!("Failed to remove corrupted file {}", dest.display())
                })?;
            }
        }
    }

    println!("  Downloading {}...", filename);
    println!("    URL: {}", url);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fetch::http(
        url,
        &dest,
        &DownloadOptions::large_file(size_bytes),
    ))?;

    // Mandatory post-download verification. A failure here deletes the file
    // so the next run starts clean.
    if let Err(e) = fetch::verify_sha256(&dest, sha256, true) {
        let _ = std::fs::remove_file(&dest);
        return Err(e).with_context(|| format!("Downloaded {} failed verification", filename));
    }

    Ok(ResolvedArchive {
        path: dest,
        source: ArchiveSource::Http,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_conda_pin_is_exact() {
        let config = CondaConfig::default();
        assert!(!config.version.is_empty());
        assert_eq!(config.sha256.len(), 64);
        assert!(config.url.contains(&config.version));
    }

    #[test]
    fn test_freesurfer_install_dir_is_versioned() {
        let config = FreeSurferConfig::default();
        assert_eq!(config.install_dir(), "opt/freesurfer-7.2.0");
        assert_eq!(config.image_home(), "/opt/freesurfer-7.2.0");
    }

    #[test]
    fn test_freesurfer_excludes_cover_heavy_subtrees() {
        let config = FreeSurferConfig::default();
        assert!(config.excludes.iter().any(|e| e.contains("trctrain")));
        assert!(config.excludes.iter().any(|e| e.contains("lib/cuda")));
        // Exclusion patterns are archive member names, so they carry the
        // tarball's top-level prefix.
        assert!(config.excludes.iter().all(|e| e.starts_with("freesurfer/")));
    }

    #[test]
    fn test_default_artifact_set_validates() {
        let set = ArtifactSet {
            conda: CondaConfig::default(),
            freesurfer: FreeSurferConfig::default(),
            fastsurfer: FastSurferConfig::default(),
            meld: MeldGraphConfig::default(),
        };
        set.validate().expect("default pins must be valid");
    }

    #[test]
    fn test_validate_rejects_missing_digest() {
        let mut set = ArtifactSet {
            conda: CondaConfig::default(),
            freesurfer: FreeSurferConfig::default(),
            fastsurfer: FastSurferConfig::default(),
            meld: MeldGraphConfig::default(),
        };
        set.freesurfer.sha256 = String::new();

        let err = set.validate().unwrap_err().to_string();
        assert!(err.contains("FreeSurfer"), "got: {err}");
        assert!(err.contains("SHA256"), "got: {err}");
    }

    #[test]
    fn test_validate_rejects_short_digest() {
        let mut set = ArtifactSet {
            conda: CondaConfig::default(),
            freesurfer: FreeSurferConfig::default(),
            fastsurfer: FastSurferConfig::default(),
            meld: MeldGraphConfig::default(),
        };
        set.conda.sha256 = "abc123".to_string();
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_floating_git_ref() {
        let mut set = ArtifactSet {
            conda: CondaConfig::default(),
            freesurfer: FreeSurferConfig::default(),
            fastsurfer: FastSurferConfig::default(),
            meld: MeldGraphConfig::default(),
        };
        set.fastsurfer.tag = "latest".to_string();

        let err = set.validate().unwrap_err().to_string();
        assert!(err.contains("floating"), "got: {err}");
    }

    #[test]
    fn test_fastsurfer_install_dir_is_versioned() {
        let config = FastSurferConfig::default();
        assert_eq!(config.install_dir(), "opt/fastsurfer-v2.2.0");
        assert_eq!(config.cache_dir(), "opt/fastsurfer-v2.2.0/checkpoints");
        assert_eq!(config.image_home(), "/opt/fastsurfer-v2.2.0");
    }

    #[test]
    #[serial]
    fn test_fastsurfer_tag_env_override() {
        std::env::set_var("FASTSURFER_TAG", "v2.0.1");
        let config = FastSurferConfig::from_env();
        std::env::remove_var("FASTSURFER_TAG");

        assert_eq!(config.tag, "v2.0.1");
        // The install prefix follows the pinned tag
        assert_eq!(config.install_dir(), "opt/fastsurfer-v2.0.1");
    }

    #[test]
    #[serial]
    fn test_freesurfer_env_override() {
        std::env::set_var("FREESURFER_VERSION", "7.4.1");
        let config = FreeSurferConfig::from_env();
        std::env::remove_var("FREESURFER_VERSION");

        assert_eq!(config.install_dir(), "opt/freesurfer-7.4.1");
    }

    #[test]
    fn test_resolve_archive_rejects_unpinned() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_archive(dir.path(), "x.tar.gz", "https://example.com/x.tar.gz", "", 1)
            .unwrap_err()
            .to_string();
        assert!(err.contains("SHA256"), "got: {err}");
    }
}
