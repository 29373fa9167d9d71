//! End-state properties of a provisioned root: persisted bindings, the
//! runtime contract, and build-to-build equivalence.
//!
//! These run the network-free steps of the real sequence (layout, bindings,
//! permissions, entrypoint); the fetch-heavy steps are covered by their
//! precondition guards in sequence_tests.

mod helpers;

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use helpers::{assert_file_contains, assert_file_exists, TestEnv};
use meldbox::manifest::ImageManifest;
use meldbox::provision::{definitions, ProvisionContext, Sequence, SequenceState};

/// The steps of the real sequence that don't touch the network.
fn offline_steps() -> Vec<meldbox::provision::Step> {
    vec![
        definitions::LAYOUT.clone(),
        definitions::BINDINGS.clone(),
        definitions::PERMISSIONS.clone(),
        definitions::ENTRYPOINT.clone(),
    ]
}

fn provision_offline(env: &TestEnv) -> (ProvisionContext, SequenceState) {
    let mut ctx = env.context();
    let mut sequence = Sequence::new(offline_steps());
    sequence.run(&mut ctx).expect("offline steps should apply");
    (ctx, sequence.state())
}

// =============================================================================
// Persisted bindings
// =============================================================================

#[test]
fn test_all_declared_bindings_land_in_profile() {
    let env = TestEnv::new();
    let (ctx, state) = provision_offline(&env);
    assert_eq!(state, SequenceState::Complete);

    let profile = env.staging.join("etc/profile.d/meld.sh");
    assert_file_exists(&profile);

    for binding in &ctx.bindings {
        assert_file_contains(&profile, &binding.export_line());
    }
}

#[test]
fn test_profile_lines_are_valid_exports() {
    let env = TestEnv::new();
    provision_offline(&env);

    let profile = fs::read_to_string(env.staging.join("etc/profile.d/meld.sh")).unwrap();
    let export = regex::Regex::new(r#"^export [A-Z_][A-Z0-9_]*=".*"$"#).unwrap();

    for line in profile.lines().filter(|l| !l.starts_with('#')) {
        assert!(export.is_match(line), "malformed export line: {line}");
    }
}

#[test]
fn test_path_binding_composes_with_runtime_path() {
    let env = TestEnv::new();
    provision_offline(&env);

    let profile = fs::read_to_string(env.staging.join("etc/profile.d/meld.sh")).unwrap();
    assert!(
        profile
            .contains("export PATH=\"/opt/freesurfer-7.2.0/bin:/opt/fastsurfer-v2.2.0:${PATH}\""),
        "PATH must prepend both versioned toolchains, got:\n{profile}"
    );
}

// =============================================================================
// Runtime contract
// =============================================================================

#[test]
fn test_manifest_declares_exactly_one_entrypoint_with_no_args() {
    let env = TestEnv::new();
    provision_offline(&env);

    let manifest = ImageManifest::read(&env.staging).unwrap();

    assert_eq!(manifest.entrypoint.program, "/bin/bash");
    // Single script, nothing synthesized beyond it
    assert_eq!(
        manifest.entrypoint.args,
        vec!["/opt/meld_graph/entrypoint.sh".to_string()]
    );
}

#[test]
fn test_concrete_runtime_scenario() {
    let env = TestEnv::new();
    provision_offline(&env);

    let manifest = ImageManifest::read(&env.staging).unwrap();
    let bindings = manifest.env_map();

    // Working directory points at the application directory
    assert_eq!(manifest.workdir, "/opt/meld_graph");
    // License-path variable points at /license.txt
    assert_eq!(bindings.get("FS_LICENSE").map(String::as_str), Some("/license.txt"));
    // Data directory binding points at the bind-mount point
    assert_eq!(bindings.get("MELD_DATA_PATH").map(String::as_str), Some("/data"));
    // Toolchain home variables
    assert_eq!(
        bindings.get("FREESURFER_HOME").map(String::as_str),
        Some("/opt/freesurfer-7.2.0")
    );
    assert_eq!(
        bindings.get("FASTSURFER_HOME").map(String::as_str),
        Some("/opt/fastsurfer-v2.2.0")
    );
}

#[test]
fn test_cache_dir_is_writable_by_non_owner() {
    let env = TestEnv::new();
    let (ctx, _) = provision_offline(&env);

    let cache = env.staging.join(ctx.config.artifacts.fastsurfer.cache_dir());
    assert!(cache.is_dir());

    let mode = fs::metadata(&cache).unwrap().permissions().mode() & 0o777;
    assert_eq!(
        mode, 0o777,
        "cache must be writable by an arbitrary runtime uid, got {:o}",
        mode
    );

    // Sanity check from the current uid (owner or not): writes succeed.
    let euid = unsafe { libc::geteuid() };
    let probe = cache.join(format!("probe-{euid}"));
    fs::write(&probe, b"checkpoint").expect("cache dir should accept writes");
}

#[test]
fn test_manifest_records_applied_steps_in_order() {
    let env = TestEnv::new();
    provision_offline(&env);

    let manifest = ImageManifest::read(&env.staging).unwrap();
    assert_eq!(
        manifest.steps,
        vec!["layout", "bindings", "permissions", "entrypoint"]
    );
}

#[test]
fn test_data_mount_point_exists() {
    let env = TestEnv::new();
    provision_offline(&env);
    assert!(env.staging.join("data").is_dir());
}

// =============================================================================
// Build-to-build equivalence
// =============================================================================

#[test]
fn test_two_runs_produce_equivalent_binding_sets() {
    let first = TestEnv::new();
    let second = TestEnv::new();

    provision_offline(&first);
    provision_offline(&second);

    let env_a: BTreeMap<_, _> = ImageManifest::read(&first.staging).unwrap().env_map();
    let env_b: BTreeMap<_, _> = ImageManifest::read(&second.staging).unwrap().env_map();

    assert_eq!(env_a, env_b, "pinned inputs must yield equivalent bindings");

    // The profile scripts are byte-identical as well.
    let profile_a = fs::read_to_string(first.staging.join("etc/profile.d/meld.sh")).unwrap();
    let profile_b = fs::read_to_string(second.staging.join("etc/profile.d/meld.sh")).unwrap();
    assert_eq!(profile_a, profile_b);
}
