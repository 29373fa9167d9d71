//! Clean command - remove provisioning outputs.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Remove the staging image root (default).
    Staging,
    /// Remove downloaded archives.
    Downloads,
    /// Remove the user-level meldbox cache.
    Cache,
    /// Remove everything.
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Staging => remove_dir("staging", &config.staging_dir),
        CleanTarget::Downloads => remove_dir("downloads", &config.downloads_dir),
        CleanTarget::Cache => clear_cache(),
        CleanTarget::All => {
            remove_dir("staging", &config.staging_dir)?;
            remove_dir("downloads", &config.downloads_dir)?;
            clear_cache()
        }
    }
}

fn remove_dir(name: &str, dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        println!("Removed {} ({})", name, dir.display());
    } else {
        println!("Nothing to clean: {} ({})", name, dir.display());
    }
    Ok(())
}

/// Clear the user-level cache directory (~/.cache/meldbox/).
fn clear_cache() -> Result<()> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("meldbox");

    if cache_dir.exists() {
        fs::remove_dir_all(&cache_dir)?;
        println!("Removed cache ({})", cache_dir.display());
    } else {
        println!("Nothing to clean: cache ({})", cache_dir.display());
    }
    Ok(())
}
