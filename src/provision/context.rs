//! Provisioning context threaded through every step.
//!
//! The single shared resource of a provisioning run is the evolving image
//! root. Rather than global state, each step receives this context, reads
//! the pinned configuration from it and records its visible effects
//! (applied steps, declared bindings, the entrypoint) on it.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::manifest::{EnvBinding, Entrypoint};

/// Shared context for all provisioning operations.
pub struct ProvisionContext {
    /// Image root being assembled.
    pub staging: PathBuf,
    /// Downloaded-artifact cache.
    pub downloads: PathBuf,
    /// Base directory of the meldbox project.
    pub base_dir: PathBuf,
    /// Effective configuration (pinned artifacts + path overrides).
    pub config: Config,
    /// Environment bindings declared so far, in declaration order.
    pub bindings: Vec<EnvBinding>,
    /// Working directory declared for the image, if any.
    pub workdir: Option<String>,
    /// The runtime entrypoint, once declared.
    pub entrypoint: Option<Entrypoint>,
    /// Names of steps applied so far.
    pub applied: Vec<&'static str>,
}

impl ProvisionContext {
    /// Create a new provisioning context from the effective configuration.
    ///
    /// Creates the staging and downloads directories; everything else is
    /// established by the sequence itself.
    pub fn new(base_dir: &Path, config: Config) -> Result<Self> {
        let staging = config.staging_dir.clone();
        let downloads = config.downloads_dir.clone();

        std::fs::create_dir_all(&staging)?;
        std::fs::create_dir_all(&downloads)?;

        Ok(Self {
            staging,
            downloads,
            base_dir: base_dir.to_path_buf(),
            config,
            bindings: Vec::new(),
            workdir: None,
            entrypoint: None,
            applied: Vec::new(),
        })
    }

    /// Create a context for testing with explicit directories.
    ///
    /// Unlike `new()`, this doesn't create anything on disk.
    #[doc(hidden)]
    pub fn for_testing(staging: &Path, downloads: &Path, base_dir: &Path, config: Config) -> Self {
        Self {
            staging: staging.to_path_buf(),
            downloads: downloads.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            config,
            bindings: Vec::new(),
            workdir: None,
            entrypoint: None,
            applied: Vec::new(),
        }
    }

    /// Resolve a path relative to the image root.
    pub fn image_path(&self, relative: &str) -> PathBuf {
        self.staging.join(relative)
    }

    /// Declare an environment binding. Bindings are immutable once set.
    pub fn declare_binding(&mut self, binding: EnvBinding) -> Result<()> {
        if self.bindings.iter().any(|b| b.name == binding.name) {
            bail!(
                "Environment binding '{}' declared twice; bindings are immutable once set",
                binding.name
            );
        }
        self.bindings.push(binding);
        Ok(())
    }

    /// Declare the runtime entrypoint. Exactly one per image.
    pub fn declare_entrypoint(&mut self, entrypoint: Entrypoint, workdir: &str) -> Result<()> {
        if self.entrypoint.is_some() {
            bail!("Runtime entrypoint declared twice; an image has exactly one");
        }
        self.entrypoint = Some(entrypoint);
        self.workdir = Some(workdir.to_string());
        Ok(())
    }
}
