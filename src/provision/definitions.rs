//! Step definitions - the declarative provisioning sequence for the MELD
//! runtime image.
//!
//! Each step describes what must land in the image root, not how. Ordering
//! is by phase:
//! 1. Layout - image skeleton
//! 2. Conda - Miniconda under opt/conda
//! 3. FreeSurfer - versioned toolchain prefix
//! 4. FastSurfer - clone + conda environment
//! 5. MeldGraph - clone, environment, package install
//! 6. Bindings - environment persisted to the profile script
//! 7. Permissions - runtime-writable cache
//! 8. Entrypoint - runtime contract + manifest

use super::{custom, dirs, require, CustomOp, Phase, Step};

// =============================================================================
// Phase 1: Layout
// =============================================================================

/// Image skeleton. `data` is the bind-mount point for subject data;
/// `etc/profile.d` carries the generated environment script.
const IMAGE_DIRS: &[&str] = &["opt", "data", "root", "etc/profile.d"];

pub static LAYOUT: Step = Step {
    name: "layout",
    phase: Phase::Layout,
    ops: &[dirs(IMAGE_DIRS)],
};

// =============================================================================
// Phase 2: Conda
// =============================================================================

pub static CONDA: Step = Step {
    name: "conda",
    phase: Phase::Conda,
    ops: &[
        require("opt", "Run the layout step first."),
        custom(CustomOp::InstallConda),
    ],
};

// =============================================================================
// Phase 3: FreeSurfer
// =============================================================================

pub static FREESURFER: Step = Step {
    name: "freesurfer",
    phase: Phase::FreeSurfer,
    ops: &[
        require("opt", "Run the layout step first."),
        custom(CustomOp::InstallFreeSurfer),
    ],
};

// =============================================================================
// Phase 4: FastSurfer
// =============================================================================

pub static FASTSURFER: Step = Step {
    name: "fastsurfer",
    phase: Phase::FastSurfer,
    ops: &[
        require(
            "opt/conda/bin/conda",
            "Run the conda step first; FastSurfer needs an environment.",
        ),
        custom(CustomOp::InstallFastSurfer),
        custom(CustomOp::CreateFastSurferEnv),
    ],
};

// =============================================================================
// Phase 5: MeldGraph
// =============================================================================

pub static MELD_GRAPH: Step = Step {
    name: "meld-graph",
    phase: Phase::MeldGraph,
    ops: &[
        require(
            "opt/conda/bin/conda",
            "Run the conda step first; meld_graph installs into a conda environment.",
        ),
        custom(CustomOp::InstallMeldGraph),
        custom(CustomOp::CreateMeldEnv),
        custom(CustomOp::InstallMeldPackage),
    ],
};

// =============================================================================
// Phase 6: Bindings
// =============================================================================

pub static BINDINGS: Step = Step {
    name: "bindings",
    phase: Phase::Bindings,
    ops: &[
        require("etc/profile.d", "Run the layout step first."),
        custom(CustomOp::DeclareBindings),
        custom(CustomOp::WriteProfile),
    ],
};

// =============================================================================
// Phase 7: Permissions
// =============================================================================

pub static PERMISSIONS: Step = Step {
    name: "permissions",
    phase: Phase::Permissions,
    ops: &[
        // FastSurfer downloads model checkpoints at runtime; the container
        // user is not the build-time owner of the tree.
        custom(CustomOp::EnsureCacheWritable),
    ],
};

// =============================================================================
// Phase 8: Entrypoint
// =============================================================================

pub static ENTRYPOINT: Step = Step {
    name: "entrypoint",
    phase: Phase::Entrypoint,
    ops: &[
        custom(CustomOp::DeclareEntrypoint),
        custom(CustomOp::WriteManifest),
    ],
};

/// The full provisioning sequence, in execution order.
pub fn sequence() -> Vec<Step> {
    vec![
        LAYOUT.clone(),
        CONDA.clone(),
        FREESURFER.clone(),
        FASTSURFER.clone(),
        MELD_GRAPH.clone(),
        BINDINGS.clone(),
        PERMISSIONS.clone(),
        ENTRYPOINT.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_ordered_by_phase() {
        let steps = sequence();
        let mut prev_phase = None;
        for step in &steps {
            if let Some(prev) = prev_phase {
                assert!(
                    step.phase > prev,
                    "Step '{}' (phase {:?}) does not come after phase {:?}",
                    step.name,
                    step.phase,
                    prev
                );
            }
            prev_phase = Some(step.phase);
        }
    }

    #[test]
    fn test_all_steps_have_unique_names() {
        let steps = sequence();
        let mut names = std::collections::HashSet::new();
        for step in &steps {
            assert!(names.insert(step.name), "Duplicate step name: {}", step.name);
        }
    }

    #[test]
    fn test_install_steps_guard_their_preconditions() {
        // Every step that installs into conda must refuse to run before
        // conda exists.
        for step in [&FASTSURFER, &MELD_GRAPH] {
            let guarded = step.ops.iter().any(|op| {
                matches!(op, crate::provision::Op::Require(path, _) if *path == "opt/conda/bin/conda")
            });
            assert!(guarded, "step '{}' has no conda guard", step.name);
        }
    }

    #[test]
    fn test_entrypoint_is_last() {
        let steps = sequence();
        assert_eq!(steps.last().map(|s| s.name), Some("entrypoint"));
    }
}
