//! Image manifest - the machine-readable face of a provisioned root.
//!
//! Written as the last provisioning step, the manifest records everything
//! the runtime contract depends on: the applied step names, the full
//! environment-binding set, the working directory and the single entrypoint.
//! Two roots provisioned from the same pins must produce equal binding sets.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Manifest filename inside the image root.
pub const MANIFEST_NAME: &str = "manifest.json";

/// A single environment binding baked into the image.
///
/// Immutable once declared; `prepend` bindings compose with whatever value
/// the variable has at container start (PATH, PYTHONPATH).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub prepend: bool,
}

impl EnvBinding {
    /// A plain `NAME=value` binding.
    pub fn set(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            prepend: false,
        }
    }

    /// A binding prepended to the variable's existing value.
    pub fn prepend(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            prepend: true,
        }
    }

    /// Render as a shell export line for the image's profile script.
    pub fn export_line(&self) -> String {
        if self.prepend {
            format!("export {}=\"{}:${{{}}}\"", self.name, self.value, self.name)
        } else {
            format!("export {}=\"{}\"", self.name, self.value)
        }
    }
}

/// The declared runtime entrypoint: one command, no synthesized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Manifest of a provisioned image root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Image identifier (package name + version of the provisioner).
    pub provisioner: String,
    /// Names of the steps applied, in order.
    pub steps: Vec<String>,
    /// Declared environment bindings, in declaration order.
    pub env: Vec<EnvBinding>,
    /// Working directory inside the image.
    pub workdir: String,
    /// The single runtime entrypoint.
    pub entrypoint: Entrypoint,
}

impl ImageManifest {
    /// Binding set keyed by name, for equivalence comparison across builds.
    ///
    /// BTreeMap gives a deterministic order regardless of declaration order.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|b| (b.name.clone(), b.value.clone()))
            .collect()
    }

    /// Sanity-check the runtime contract before writing.
    pub fn validate(&self) -> Result<()> {
        if self.entrypoint.program.is_empty() {
            bail!("Manifest has no entrypoint program");
        }
        if self.workdir.is_empty() {
            bail!("Manifest has no working directory");
        }

        let mut seen = std::collections::HashSet::new();
        for binding in &self.env {
            if !seen.insert(binding.name.as_str()) {
                bail!("Duplicate environment binding: {}", binding.name);
            }
        }
        Ok(())
    }

    /// Write the manifest into an image root.
    pub fn write(&self, image_root: &Path) -> Result<()> {
        self.validate()?;
        let path = image_root.join(MANIFEST_NAME);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
        Ok(())
    }

    /// Read the manifest from an image root.
    pub fn read(image_root: &Path) -> Result<Self> {
        let path = image_root.join(MANIFEST_NAME);
        if !path.exists() {
            bail!(
                "No manifest at {}. Run 'meldbox provision' first.",
                path.display()
            );
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> ImageManifest {
        ImageManifest {
            provisioner: "meldbox 0.1.0".to_string(),
            steps: vec!["layout".to_string(), "bindings".to_string()],
            env: vec![
                EnvBinding::set("FS_LICENSE", "/license.txt"),
                EnvBinding::prepend("PATH", "/opt/freesurfer-7.2.0/bin"),
            ],
            workdir: "/opt/meld_graph".to_string(),
            entrypoint: Entrypoint {
                program: "/bin/bash".to_string(),
                args: vec!["/opt/meld_graph/entrypoint.sh".to_string()],
            },
        }
    }

    #[test]
    fn test_export_line_set() {
        let b = EnvBinding::set("FS_LICENSE", "/license.txt");
        assert_eq!(b.export_line(), "export FS_LICENSE=\"/license.txt\"");
    }

    #[test]
    fn test_export_line_prepend() {
        let b = EnvBinding::prepend("PATH", "/opt/fastsurfer");
        assert_eq!(b.export_line(), "export PATH=\"/opt/fastsurfer:${PATH}\"");
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();

        manifest.write(dir.path()).unwrap();
        let read = ImageManifest::read(dir.path()).unwrap();

        assert_eq!(read.steps, manifest.steps);
        assert_eq!(read.env, manifest.env);
        assert_eq!(read.entrypoint, manifest.entrypoint);
        assert_eq!(read.workdir, "/opt/meld_graph");
    }

    #[test]
    fn test_manifest_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageManifest::read(dir.path()).unwrap_err().to_string();
        assert!(err.contains("provision"), "got: {err}");
    }

    #[test]
    fn test_env_map_is_order_independent() {
        let mut a = sample_manifest();
        let mut b = sample_manifest();
        b.env.reverse();

        assert_eq!(a.env_map(), b.env_map());

        // And sensitive to actual differences
        a.env.push(EnvBinding::set("EXTRA", "1"));
        assert_ne!(a.env_map(), b.env_map());
    }

    #[test]
    fn test_validate_rejects_duplicate_binding() {
        let mut manifest = sample_manifest();
        manifest.env.push(EnvBinding::set("FS_LICENSE", "/elsewhere"));

        let err = manifest.validate().unwrap_err().to_string();
        assert!(err.contains("Duplicate"), "got: {err}");
    }

    #[test]
    fn test_validate_rejects_empty_entrypoint() {
        let mut manifest = sample_manifest();
        manifest.entrypoint.program = String::new();
        assert!(manifest.validate().is_err());
    }
}
