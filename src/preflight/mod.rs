//! Preflight checks for image provisioning.
//!
//! Validates host tools, the build environment and the artifact pins before
//! starting a provisioning run. Run with `meldbox preflight` to check
//! everything is ready.

mod environment;
mod host_tools;
mod pins;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> Result<PreflightReport> {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    // =======================================================================
    // Host Tools
    // =======================================================================
    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    // =======================================================================
    // Artifact pins
    // =======================================================================
    println!("Checking artifact pins...");
    checks.extend(pins::check_pins(&config.artifacts));

    // =======================================================================
    // Build Environment
    // =======================================================================
    println!("Checking build environment...");
    checks.extend(environment::check_build_environment(config));

    println!();

    Ok(PreflightReport { checks })
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config)?;
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before provisioning.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
