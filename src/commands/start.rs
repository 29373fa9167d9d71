//! Start command - dispatch to the image's runtime entrypoint.
//!
//! This mirrors what the container runtime does at image start: export the
//! declared environment bindings, switch to the declared working directory
//! and hand control to the single entrypoint. No arguments are synthesized;
//! the script reads its configuration (license file, data paths) from the
//! environment and filesystem. The entrypoint's exit code becomes our exit
//! code.
//!
//! Paths in the manifest are image-absolute (`/opt/...`); when dispatching
//! from the host for a smoke test they are resolved inside the staging
//! root.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::manifest::ImageManifest;
use crate::process::Cmd;

/// Execute the start command. Only returns on setup failure; on success the
/// process exits with the entrypoint's code.
pub fn cmd_start(config: &Config) -> Result<()> {
    let image_root = &config.staging_dir;
    let manifest = ImageManifest::read(image_root)?;

    let script = resolve_in_image(image_root, entry_script(&manifest)?);
    if !script.exists() {
        bail!(
            "Entrypoint script {} not found in image root. The meld-graph step may not have run.",
            script.display()
        );
    }

    let workdir = resolve_in_image(image_root, &manifest.workdir);
    if !workdir.exists() {
        bail!("Working directory {} not found in image root", workdir.display());
    }

    println!(
        "Starting {} {} (workdir {})",
        manifest.entrypoint.program,
        manifest.entrypoint.args.join(" "),
        manifest.workdir
    );

    let mut cmd = Cmd::new(&manifest.entrypoint.program)
        .arg_path(&script)
        .dir(&workdir)
        .allow_fail();

    for binding in &manifest.env {
        if binding.prepend {
            let existing = std::env::var(&binding.name).unwrap_or_default();
            let value = if existing.is_empty() {
                binding.value.clone()
            } else {
                format!("{}:{}", binding.value, existing)
            };
            cmd = cmd.env(&binding.name, value);
        } else {
            cmd = cmd.env(&binding.name, &binding.value);
        }
    }
    cmd = cmd.env("MELDBOX_IMAGE_ROOT", image_root.to_string_lossy());

    let status = cmd
        .run_interactive()
        .context("Failed to launch entrypoint")?;

    // Propagate the script's exit code verbatim.
    std::process::exit(status.code().unwrap_or(-1));
}

/// The single script argument of the entrypoint.
fn entry_script(manifest: &ImageManifest) -> Result<&str> {
    match manifest.entrypoint.args.as_slice() {
        [script] => Ok(script),
        [] => bail!("Entrypoint has no script argument"),
        other => bail!(
            "Entrypoint carries {} arguments; an image declares exactly one script and no synthesized arguments",
            other.len()
        ),
    }
}

/// Map an image-absolute path into the staging root.
fn resolve_in_image(image_root: &Path, image_path: &str) -> std::path::PathBuf {
    image_root.join(image_path.trim_start_matches('/'))
}
