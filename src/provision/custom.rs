//! Imperative provisioning operations.
//!
//! Operations that need the pinned artifact configs or mutate context state
//! (declared bindings, the entrypoint) live here; the declarative ops in
//! `executor` stay dumb.

use anyhow::{bail, Context, Result};
use std::fs;

use super::{CustomOp, ProvisionContext};
use crate::artifact;
use crate::fetch;
use crate::manifest::{EnvBinding, Entrypoint, ImageManifest};
use crate::process::Cmd;

/// Shell-startup file carrying the image's environment bindings.
pub const PROFILE_PATH: &str = "etc/profile.d/meld.sh";

/// Dispatch a custom operation.
pub fn execute(ctx: &mut ProvisionContext, op: CustomOp) -> Result<()> {
    match op {
        CustomOp::InstallConda => install_conda(ctx),
        CustomOp::InstallFreeSurfer => install_freesurfer(ctx),
        CustomOp::InstallFastSurfer => install_fastsurfer(ctx),
        CustomOp::CreateFastSurferEnv => create_fastsurfer_env(ctx),
        CustomOp::InstallMeldGraph => install_meld_graph(ctx),
        CustomOp::CreateMeldEnv => create_meld_env(ctx),
        CustomOp::InstallMeldPackage => install_meld_package(ctx),
        CustomOp::EnsureCacheWritable => ensure_cache_writable(ctx),
        CustomOp::DeclareBindings => declare_bindings(ctx),
        CustomOp::WriteProfile => write_profile(ctx),
        CustomOp::DeclareEntrypoint => declare_entrypoint(ctx),
        CustomOp::WriteManifest => write_manifest(ctx),
    }
}

// =============================================================================
// Miniconda
// =============================================================================

/// Run the pinned Miniconda installer into opt/conda.
fn install_conda(ctx: &mut ProvisionContext) -> Result<()> {
    let conda = ctx.config.artifacts.conda.clone();
    let prefix = ctx.image_path(&conda.prefix);
    let conda_bin = prefix.join("bin/conda");

    if conda_bin.exists() {
        println!("  conda already installed at {}", prefix.display());
        return Ok(());
    }

    let archive = artifact::resolve_archive(
        &ctx.downloads,
        &conda.filename,
        &conda.url,
        &conda.sha256,
        conda.size_bytes,
    )?;

    println!("  Running Miniconda installer...");
    Cmd::new("bash")
        .arg_path(&archive.path)
        .args(["-b", "-p"])
        .arg_path(&prefix)
        .error_msg("Miniconda installer failed")
        .run()?;

    if !conda_bin.exists() {
        bail!(
            "Miniconda installer completed but {} is missing",
            conda_bin.display()
        );
    }
    Ok(())
}

// =============================================================================
// FreeSurfer
// =============================================================================

/// Extract the pinned FreeSurfer tarball under its versioned prefix.
fn install_freesurfer(ctx: &mut ProvisionContext) -> Result<()> {
    let fs_config = ctx.config.artifacts.freesurfer.clone();
    let install_dir = ctx.image_path(&fs_config.install_dir());
    let recon_all = install_dir.join("bin/recon-all");

    if recon_all.exists() {
        println!("  FreeSurfer already installed at {}", install_dir.display());
        return Ok(());
    }

    let archive = artifact::resolve_archive(
        &ctx.downloads,
        &fs_config.filename,
        &fs_config.url,
        &fs_config.sha256,
        fs_config.size_bytes,
    )?;

    println!(
        "  Extracting FreeSurfer {} ({} exclusions)...",
        fs_config.version,
        fs_config.excludes.len()
    );
    let rt = tokio::runtime::Runtime::new()?;
    // The tarball has a single `freesurfer/` top-level dir; strip it so the
    // tree lands directly under the versioned prefix.
    rt.block_on(fetch::extract_tarball(
        &archive.path,
        &install_dir,
        1,
        &fs_config.excludes,
    ))?;

    if !recon_all.exists() {
        bail!(
            "FreeSurfer extraction completed but {} is missing",
            recon_all.display()
        );
    }
    Ok(())
}

// =============================================================================
// FastSurfer
// =============================================================================

/// Clone FastSurfer at its pinned release tag.
fn install_fastsurfer(ctx: &mut ProvisionContext) -> Result<()> {
    let config = ctx.config.artifacts.fastsurfer.clone();
    let dest = ctx.image_path(&config.install_dir());

    if dest.join(".git").exists() {
        println!("  FastSurfer already cloned at {}", dest.display());
        return Ok(());
    }

    println!("  Cloning FastSurfer {} ...", config.tag);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fetch::git_clone_pinned(&config.git_url, &config.tag, &dest))?;
    Ok(())
}

/// Create the FastSurfer conda environment.
fn create_fastsurfer_env(ctx: &mut ProvisionContext) -> Result<()> {
    let config = ctx.config.artifacts.fastsurfer.clone();
    let env_file = ctx.image_path(&config.install_dir()).join(&config.env_file);
    create_conda_env(ctx, &config.env_name, &env_file)
}

/// Ensure the FastSurfer checkpoint cache is writable by the runtime user.
///
/// FastSurfer downloads model checkpoints on first use. The container runs
/// as an arbitrary uid that does not own the tree, so the cache directory's
/// mode is opened rather than its ownership reassigned.
fn ensure_cache_writable(ctx: &mut ProvisionContext) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let cache = ctx.image_path(&ctx.config.artifacts.fastsurfer.cache_dir());
    fs::create_dir_all(&cache)
        .with_context(|| format!("Failed to create {}", cache.display()))?;
    fs::set_permissions(&cache, fs::Permissions::from_mode(0o777))
        .with_context(|| format!("Failed to open permissions on {}", cache.display()))?;
    Ok(())
}

// =============================================================================
// meld_graph
// =============================================================================

/// Clone meld_graph at its pinned release branch.
fn install_meld_graph(ctx: &mut ProvisionContext) -> Result<()> {
    let config = ctx.config.artifacts.meld.clone();
    let dest = ctx.image_path(&config.install_dir);

    if dest.join(".git").exists() {
        println!("  meld_graph already cloned at {}", dest.display());
        return Ok(());
    }

    println!("  Cloning meld_graph ({} branch)...", config.branch);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fetch::git_clone_pinned(&config.git_url, &config.branch, &dest))?;
    Ok(())
}

/// Create the meld_graph conda environment from environment.yml.
fn create_meld_env(ctx: &mut ProvisionContext) -> Result<()> {
    let config = ctx.config.artifacts.meld.clone();
    let env_file = ctx.image_path(&config.install_dir).join(&config.env_file);
    create_conda_env(ctx, &config.env_name, &env_file)
}

/// Install the meld_graph package into its conda environment.
fn install_meld_package(ctx: &mut ProvisionContext) -> Result<()> {
    let config = ctx.config.artifacts.meld.clone();
    let conda_bin = conda_binary(ctx)?;
    let env_dir = conda_env_dir(ctx, &config.env_name);
    let repo = ctx.image_path(&config.install_dir);

    if !env_dir.exists() {
        bail!(
            "conda environment '{}' not found at {}. Create the environment before installing the package.",
            config.env_name,
            env_dir.display()
        );
    }
    if !repo.join("setup.py").exists() && !repo.join("pyproject.toml").exists() {
        bail!(
            "No installable package at {}. Clone meld_graph before installing.",
            repo.display()
        );
    }

    println!("  Installing meld_graph into '{}'...", config.env_name);
    Cmd::new(conda_bin.to_string_lossy())
        .args(["run", "-n", &config.env_name, "pip", "install", "-e", "."])
        .dir(&repo)
        .error_msg("meld_graph package install failed")
        .run()?;
    Ok(())
}

// =============================================================================
// Conda helpers
// =============================================================================

fn conda_binary(ctx: &ProvisionContext) -> Result<std::path::PathBuf> {
    let conda_bin = ctx
        .image_path(&ctx.config.artifacts.conda.prefix)
        .join("bin/conda");
    if !conda_bin.exists() {
        bail!(
            "conda not found at {}. The conda step must run before environments are created.",
            conda_bin.display()
        );
    }
    Ok(conda_bin)
}

fn conda_env_dir(ctx: &ProvisionContext, name: &str) -> std::path::PathBuf {
    ctx.image_path(&ctx.config.artifacts.conda.prefix)
        .join("envs")
        .join(name)
}

/// Create a named conda environment from an environment file.
fn create_conda_env(ctx: &ProvisionContext, name: &str, env_file: &std::path::Path) -> Result<()> {
    let conda_bin = conda_binary(ctx)?;
    let env_dir = conda_env_dir(ctx, name);

    if env_dir.exists() {
        println!("  conda environment '{}' already exists", name);
        return Ok(());
    }
    if !env_file.exists() {
        bail!(
            "Environment file {} not found. Clone the repository before creating its environment.",
            env_file.display()
        );
    }

    println!("  Creating conda environment '{}'...", name);
    Cmd::new(conda_bin.to_string_lossy())
        .args(["env", "create", "-n", name, "-f"])
        .arg_path(env_file)
        .error_msg(format!("conda env create failed for '{}'", name))
        .run()?;
    Ok(())
}

// =============================================================================
// Bindings and entrypoint
// =============================================================================

/// Declare the image's environment bindings on the context.
///
/// One binding per variable; PATH and PYTHONPATH compose with the runtime
/// value instead of replacing it.
fn declare_bindings(ctx: &mut ProvisionContext) -> Result<()> {
    let freesurfer_home = ctx.config.artifacts.freesurfer.image_home();
    let fastsurfer_home = ctx.config.artifacts.fastsurfer.image_home();
    let meld_home = ctx.config.artifacts.meld.image_home();
    let license = ctx.config.artifacts.meld.license_path.clone();
    let data_dir = format!("/{}", ctx.config.artifacts.meld.data_dir);

    let bindings = [
        EnvBinding::set("FREESURFER_HOME", &freesurfer_home),
        EnvBinding::set("FS_LICENSE", &license),
        EnvBinding::set("FASTSURFER_HOME", &fastsurfer_home),
        EnvBinding::set("MELD_DATA_PATH", &data_dir),
        EnvBinding::prepend("PYTHONPATH", &meld_home),
        EnvBinding::prepend(
            "PATH",
            &format!("{}/bin:{}", freesurfer_home, fastsurfer_home),
        ),
    ];

    for binding in bindings {
        ctx.declare_binding(binding)?;
    }
    Ok(())
}

/// Persist declared bindings to the shell-startup file.
fn write_profile(ctx: &mut ProvisionContext) -> Result<()> {
    if ctx.bindings.is_empty() {
        bail!("No environment bindings declared; nothing to persist");
    }

    let profile = ctx.image_path(PROFILE_PATH);
    let parent = profile
        .parent()
        .context("Profile path has no parent directory")?;
    if !parent.exists() {
        bail!(
            "{} missing from image root. Run the layout step first.",
            parent.display()
        );
    }

    let mut content = String::from("# MELD runtime environment. Generated - do not edit.\n");
    for binding in &ctx.bindings {
        content.push_str(&binding.export_line());
        content.push('\n');
    }

    fs::write(&profile, content)
        .with_context(|| format!("Failed to write {}", profile.display()))?;
    println!("  Wrote {} bindings to {}", ctx.bindings.len(), PROFILE_PATH);
    Ok(())
}

/// Declare the single runtime entrypoint and working directory.
fn declare_entrypoint(ctx: &mut ProvisionContext) -> Result<()> {
    let meld = ctx.config.artifacts.meld.clone();
    let script = format!("{}/{}", meld.image_home(), meld.entrypoint);

    // No synthesized arguments: the script reads its configuration from the
    // environment and filesystem at container start.
    let entrypoint = Entrypoint {
        program: "/bin/bash".to_string(),
        args: vec![script],
    };
    ctx.declare_entrypoint(entrypoint, &meld.image_home())
}

/// Write the image manifest.
fn write_manifest(ctx: &mut ProvisionContext) -> Result<()> {
    let entrypoint = ctx
        .entrypoint
        .clone()
        .context("No entrypoint declared; declare the entrypoint before writing the manifest")?;
    let workdir = ctx
        .workdir
        .clone()
        .context("No working directory declared")?;

    let manifest = ImageManifest {
        provisioner: format!("meldbox {}", env!("CARGO_PKG_VERSION")),
        steps: ctx.applied.iter().map(|s| s.to_string()).collect(),
        env: ctx.bindings.clone(),
        workdir,
        entrypoint,
    };

    manifest.write(&ctx.staging)?;
    println!("  Wrote {}", crate::manifest::MANIFEST_NAME);
    Ok(())
}
