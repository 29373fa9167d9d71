//! Show command - configuration, manifest and provisioning status.

use anyhow::Result;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::manifest::ImageManifest;
use crate::provision::custom::PROFILE_PATH;

/// Show target for the show command.
pub enum ShowTarget {
    /// Effective configuration.
    Config,
    /// Manifest of the provisioned root.
    Manifest,
    /// Per-phase provisioning status.
    Status,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
            Ok(())
        }
        ShowTarget::Manifest => show_manifest(config),
        ShowTarget::Status => show_status(config),
    }
}

fn show_manifest(config: &Config) -> Result<()> {
    let manifest = ImageManifest::read(&config.staging_dir)?;

    println!("Provisioner: {}", manifest.provisioner);
    println!("Workdir:     {}", manifest.workdir);
    println!(
        "Entrypoint:  {} {}",
        manifest.entrypoint.program,
        manifest.entrypoint.args.join(" ")
    );
    println!("\nSteps applied:");
    for step in &manifest.steps {
        println!("  - {}", step);
    }
    println!("\nEnvironment bindings:");
    for binding in &manifest.env {
        let marker = if binding.prepend { " (prepend)" } else { "" };
        println!("  {}={}{}", binding.name, binding.value, marker);
    }
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let root = &config.staging_dir;
    let freesurfer_dir = config.artifacts.freesurfer.install_dir();

    let markers: Vec<(&str, String)> = vec![
        ("layout", "opt".to_string()),
        ("conda", "opt/conda/bin/conda".to_string()),
        ("freesurfer", format!("{}/bin/recon-all", freesurfer_dir)),
        ("fastsurfer", format!("{}/.git", config.artifacts.fastsurfer.install_dir())),
        ("meld-graph", format!("{}/.git", config.artifacts.meld.install_dir)),
        ("bindings", PROFILE_PATH.to_string()),
        ("permissions", config.artifacts.fastsurfer.cache_dir()),
        ("entrypoint", crate::manifest::MANIFEST_NAME.to_string()),
    ];

    println!("Image root: {}\n", root.display());
    for (step, marker) in &markers {
        let path = root.join(marker);
        let status = if path.exists() { "done" } else { "pending" };
        println!("  {:12} [{}]", step, status);
    }

    if root.exists() {
        let size = tree_size(root);
        println!("\nTotal size: {:.1} GB", size as f64 / (1024.0 * 1024.0 * 1024.0));
    }
    Ok(())
}

/// Total size of a directory tree in bytes.
fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_size_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 50]).unwrap();

        assert_eq!(tree_size(dir.path()), 150);
    }

    #[test]
    fn test_tree_size_missing_dir_is_zero() {
        assert_eq!(tree_size(Path::new("/nonexistent-meldbox-dir")), 0);
    }
}
