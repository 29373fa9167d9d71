//! Build environment checks: writable directories and disk space.

use std::fs;
use std::path::Path;

use super::types::CheckResult;
use crate::config::Config;

/// Disk space needed for the FreeSurfer tarball plus the extracted tree and
/// the conda environments, with headroom.
const REQUIRED_SPACE_BYTES: u64 = 40 * 1024 * 1024 * 1024; // 40 GiB

/// Check the build environment.
pub fn check_build_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(check_writable("staging dir", &config.staging_dir));
    results.push(check_writable("downloads dir", &config.downloads_dir));
    results.push(check_disk_space(&config.downloads_dir));

    results
}

/// Verify a directory exists (or can be created) and accepts writes.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }

    let probe = dir.join(".meldbox-write-probe");
    match fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

/// Check free disk space where the downloads land.
fn check_disk_space(dir: &Path) -> CheckResult {
    match available_space(dir) {
        Some(avail) => {
            let avail_gb = avail as f64 / (1024.0 * 1024.0 * 1024.0);
            if avail < REQUIRED_SPACE_BYTES {
                let required_gb = REQUIRED_SPACE_BYTES as f64 / (1024.0 * 1024.0 * 1024.0);
                CheckResult::warn(
                    "disk space",
                    &format!(
                        "{:.1} GB available, {:.0} GB recommended (FreeSurfer alone is ~9 GB compressed)",
                        avail_gb, required_gb
                    ),
                )
            } else {
                CheckResult::pass_with("disk space", &format!("{:.1} GB available", avail_gb))
            }
        }
        None => CheckResult::warn(
            "disk space",
            "Could not determine free space; ensure ~40 GB is available",
        ),
    }
}

/// Get available disk space in bytes. Returns None if the check fails.
fn available_space(path: &Path) -> Option<u64> {
    use std::process::Command;

    // POSIX df with -k (1K blocks) parses the same on Linux, macOS and BSD.
    let output = Command::new("df").arg("-k").arg(path).output().ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);

    // Filesystem     1K-blocks      Used Available Use% Mounted on
    // /dev/sda1      123456789  12345678  98765432  12% /
    let line = stdout.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() >= 4 {
        if let Ok(kb) = fields[3].parse::<u64>() {
            return Some(kb * 1024);
        }
    }

    None
}
