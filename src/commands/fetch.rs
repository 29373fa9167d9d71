//! Fetch command - downloads and verifies archive artifacts up front.
//!
//! Provisioning fetches on demand; this command exists to warm the
//! downloads cache (e.g. on a fast network) before a long offline build.

use anyhow::Result;

use crate::artifact;
use crate::config::Config;

/// Fetch target for the fetch command.
pub enum FetchTarget {
    /// Fetch all archive artifacts.
    All,
    /// Miniconda installer only.
    Conda,
    /// FreeSurfer tarball only.
    FreeSurfer,
}

/// Execute the fetch command.
pub fn cmd_fetch(config: &Config, target: FetchTarget) -> Result<()> {
    config.artifacts.validate()?;
    std::fs::create_dir_all(&config.downloads_dir)?;

    match target {
        FetchTarget::All => {
            fetch_conda(config)?;
            fetch_freesurfer(config)?;
            println!("\nAll archives fetched and verified.");
        }
        FetchTarget::Conda => fetch_conda(config)?,
        FetchTarget::FreeSurfer => fetch_freesurfer(config)?,
    }
    Ok(())
}

fn fetch_conda(config: &Config) -> Result<()> {
    let conda = &config.artifacts.conda;
    println!("Miniconda {}:", conda.version);
    let resolved = artifact::resolve_archive(
        &config.downloads_dir,
        &conda.filename,
        &conda.url,
        &conda.sha256,
        conda.size_bytes,
    )?;
    println!("  -> {} [{:?}]", resolved.path.display(), resolved.source);
    Ok(())
}

fn fetch_freesurfer(config: &Config) -> Result<()> {
    let freesurfer = &config.artifacts.freesurfer;
    println!("FreeSurfer {}:", freesurfer.version);
    let resolved = artifact::resolve_archive(
        &config.downloads_dir,
        &freesurfer.filename,
        &freesurfer.url,
        &freesurfer.sha256,
        freesurfer.size_bytes,
    )?;
    println!("  -> {} [{:?}]", resolved.path.display(), resolved.source);
    Ok(())
}
