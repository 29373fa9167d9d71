//! Provision command - runs the full provisioning sequence.

use anyhow::Result;
use std::path::Path;
use std::time::Instant;

use crate::config::Config;
use crate::preflight;
use crate::provision::{definitions, ProvisionContext, Sequence};

/// Execute the provision command.
///
/// Applies the full step sequence against the staging root. A failed step
/// aborts the run; the partial root is left behind for inspection and a
/// re-run starts from the first step (fetches of already-verified archives
/// are skipped).
pub fn cmd_provision(base_dir: &Path, config: &Config, skip_preflight: bool) -> Result<()> {
    println!("=== MELD image provisioning ===\n");
    let start = Instant::now();

    if skip_preflight {
        println!("Skipping preflight checks (--no-preflight)\n");
    } else {
        preflight::run_preflight_or_fail(config)?;
    }

    // Pins are re-checked even with preflight skipped; an unpinned artifact
    // must never reach the network.
    config.artifacts.validate()?;

    let mut ctx = ProvisionContext::new(base_dir, config.clone())?;
    let mut sequence = Sequence::new(definitions::sequence());

    let total = sequence.steps().len();
    println!("Applying {} steps to {}\n", total, ctx.staging.display());

    sequence.run(&mut ctx)?;

    let mins = start.elapsed().as_secs_f64() / 60.0;
    println!("\nProvisioning complete in {:.1}m", mins);
    println!("  Image root: {}", ctx.staging.display());
    println!("  Entrypoint: declared (see manifest.json)");
    Ok(())
}
