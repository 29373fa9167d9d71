//! Artifact pin checks.
//!
//! Every external locator must be exact before any network traffic happens;
//! a bad override should fail the preflight, not the third hour of a build.

use super::types::CheckResult;
use crate::artifact::ArtifactSet;

/// Check every artifact pin is exact and reproducible.
pub fn check_pins(artifacts: &ArtifactSet) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match artifacts.validate() {
        Ok(()) => {
            results.push(CheckResult::pass_with(
                "artifact pins",
                "all locators exact",
            ));
        }
        Err(e) => {
            results.push(CheckResult::fail("artifact pins", &format!("{:#}", e)));
        }
    }

    results.push(CheckResult::pass_with(
        "Miniconda",
        &format!("{} ({})", artifacts.conda.version, short_digest(&artifacts.conda.sha256)),
    ));
    results.push(CheckResult::pass_with(
        "FreeSurfer",
        &format!(
            "{} ({})",
            artifacts.freesurfer.version,
            short_digest(&artifacts.freesurfer.sha256)
        ),
    ));
    results.push(CheckResult::pass_with(
        "FastSurfer",
        &format!("tag {}", artifacts.fastsurfer.tag),
    ));
    results.push(CheckResult::pass_with(
        "meld_graph",
        &format!("branch {}", artifacts.meld.branch),
    ));

    results
}

fn short_digest(sha256: &str) -> String {
    if sha256.len() >= 12 {
        format!("sha256:{}…", &sha256[..12])
    } else {
        format!("sha256:{}", sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactSet;
    use crate::preflight::types::CheckStatus;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_pins_pass() {
        let results = check_pins(&ArtifactSet::from_env());
        let pins = results.iter().find(|c| c.name == "artifact pins").unwrap();
        assert_eq!(pins.status, CheckStatus::Pass);
    }

    #[test]
    fn test_broken_pin_fails() {
        let mut artifacts = ArtifactSet::from_env();
        artifacts.freesurfer.sha256 = "nope".to_string();

        let results = check_pins(&artifacts);
        let pins = results.iter().find(|c| c.name == "artifact pins").unwrap();
        assert_eq!(pins.status, CheckStatus::Fail);
    }
}
