//! Declarative provisioning-step system for the MELD runtime image.
//!
//! Steps are defined as static data structures that describe WHAT must
//! happen to the image root, not HOW. The executor interprets them, the
//! sequence runner applies them in strict order.
//!
//! ```text
//! Step Definition (DATA)            →     Executor (LOGIC)
//! ─────────────────────────────          ─────────────────
//! CONDA = Step {                         for op in step.ops {
//!   ops: [                                 execute_op(ctx, op)?;
//!     require("opt", ...),               }
//!     custom(CustomOp::InstallConda),
//!   ]
//! }
//! ```
//!
//! Every operation is required: a step either fully applies or the whole
//! sequence aborts at that step. There is no partial success and no retry.

pub mod context;
pub mod custom;
pub mod definitions;
pub mod executor;
pub mod sequence;

pub use context::ProvisionContext;
pub use sequence::{Sequence, SequenceState};

use std::fmt;

/// A provisioning step: one ordered unit of image-build work.
///
/// Steps are immutable, static data. Ordering across steps comes from
/// `Phase`; ops within a step run in definition order.
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable name for logging and the manifest.
    pub name: &'static str,
    /// Provisioning phase (determines ordering).
    pub phase: Phase,
    /// Operations to perform.
    pub ops: &'static [Op],
}

/// Provisioning phases determine step ordering.
///
/// Later phases depend on filesystem state established by earlier ones:
/// the conda environment must exist before meld_graph installs into it,
/// the clones must exist before bindings point at them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Image skeleton: /opt, /data, /etc/profile.d.
    Layout = 1,
    /// Miniconda installed into opt/conda.
    Conda = 2,
    /// FreeSurfer extracted under its versioned prefix.
    FreeSurfer = 3,
    /// FastSurfer clone + conda environment.
    FastSurfer = 4,
    /// meld_graph clone, environment and package install.
    MeldGraph = 5,
    /// Environment bindings declared and persisted to the profile script.
    Bindings = 6,
    /// Runtime-writability fixups.
    Permissions = 7,
    /// Entrypoint declaration and manifest.
    Entrypoint = 8,
}

/// Operations that can be performed during step execution.
///
/// Each variant is a single atomic operation. The executor owns the
/// implementation so behavior stays consistent across steps.
#[derive(Debug, Clone)]
pub enum Op {
    // ─────────────────────────────────────────────────────────────────────
    // Directory operations
    // ─────────────────────────────────────────────────────────────────────
    /// Create a directory (uses create_dir_all).
    Dir(&'static str),

    /// Create multiple directories at once.
    Dirs(&'static [&'static str]),

    /// Create a directory with specific permissions.
    DirMode(&'static str, u32),

    // ─────────────────────────────────────────────────────────────────────
    // File operations
    // ─────────────────────────────────────────────────────────────────────
    /// Write a file with given content.
    WriteFile(&'static str, &'static str),

    /// Write a file with specific permissions.
    WriteFileMode(&'static str, &'static str, u32),

    // ─────────────────────────────────────────────────────────────────────
    // Ordering guards
    // ─────────────────────────────────────────────────────────────────────
    /// Require a path (relative to the image root) established by an
    /// earlier step. Fails the step if missing; the second field is the
    /// hint printed with the error.
    Require(&'static str, &'static str),

    // ─────────────────────────────────────────────────────────────────────
    // External commands
    // ─────────────────────────────────────────────────────────────────────
    /// Run a command with the image root as working directory. Non-zero
    /// exit aborts the step.
    Run(&'static str, &'static [&'static str]),

    // ─────────────────────────────────────────────────────────────────────
    // Custom operations (dispatch to custom.rs)
    // ─────────────────────────────────────────────────────────────────────
    /// Run an imperative operation that needs config or context state.
    Custom(CustomOp),
}

/// Custom operations that require imperative code.
///
/// These need the pinned artifact configs or mutate context state, which
/// doesn't fit the static declarative pattern. Each variant maps to a
/// function in custom.rs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomOp {
    /// Resolve the Miniconda installer and run it into opt/conda.
    InstallConda,
    /// Resolve the FreeSurfer tarball and extract it under the versioned
    /// prefix, honoring the exclusion filters.
    InstallFreeSurfer,
    /// Clone FastSurfer at its pinned tag into its versioned prefix.
    InstallFastSurfer,
    /// Create the FastSurfer conda environment.
    CreateFastSurferEnv,
    /// Clone meld_graph at its pinned branch into opt/meld_graph.
    InstallMeldGraph,
    /// Create the meld_graph conda environment from environment.yml.
    CreateMeldEnv,
    /// Install the meld_graph package into its environment.
    InstallMeldPackage,
    /// Ensure the FastSurfer checkpoint cache is writable by the runtime
    /// user. The container user differs from the owner baked in at build
    /// time, so this opens the directory mode rather than reassigning
    /// ownership.
    EnsureCacheWritable,
    /// Declare the image's environment bindings on the context.
    DeclareBindings,
    /// Persist declared bindings to the shell-startup file.
    WriteProfile,
    /// Declare the single runtime entrypoint and working directory.
    DeclareEntrypoint,
    /// Write the image manifest.
    WriteManifest,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper functions for readable step definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Create a directory.
pub const fn dir(path: &'static str) -> Op {
    Op::Dir(path)
}

/// Create multiple directories.
pub const fn dirs(paths: &'static [&'static str]) -> Op {
    Op::Dirs(paths)
}

/// Create a directory with specific mode.
pub const fn dir_mode(path: &'static str, mode: u32) -> Op {
    Op::DirMode(path, mode)
}

/// Write a file.
pub const fn write_file(path: &'static str, content: &'static str) -> Op {
    Op::WriteFile(path, content)
}

/// Require a path established by an earlier step.
pub const fn require(path: &'static str, hint: &'static str) -> Op {
    Op::Require(path, hint)
}

/// Run a command in the image root.
pub const fn run(program: &'static str, args: &'static [&'static str]) -> Op {
    Op::Run(program, args)
}

/// Run a custom operation.
pub const fn custom(op: CustomOp) -> Op {
    Op::Custom(op)
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Layout => write!(f, "Layout"),
            Phase::Conda => write!(f, "Conda"),
            Phase::FreeSurfer => write!(f, "FreeSurfer"),
            Phase::FastSurfer => write!(f, "FastSurfer"),
            Phase::MeldGraph => write!(f, "MeldGraph"),
            Phase::Bindings => write!(f, "Bindings"),
            Phase::Permissions => write!(f, "Permissions"),
            Phase::Entrypoint => write!(f, "Entrypoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Phase ordering must match the dependency chain: nothing installs
    /// before the layout exists, nothing binds before the installs, the
    /// manifest comes last.
    #[test]
    fn test_phase_ordering_is_correct() {
        assert!(Phase::Layout < Phase::Conda);
        assert!(Phase::Conda < Phase::FreeSurfer);
        assert!(Phase::FreeSurfer < Phase::FastSurfer);
        assert!(Phase::FastSurfer < Phase::MeldGraph);
        assert!(Phase::MeldGraph < Phase::Bindings);
        assert!(Phase::Bindings < Phase::Permissions);
        assert!(Phase::Permissions < Phase::Entrypoint);
    }

    #[test]
    fn test_layout_phase_is_first() {
        let phases = [
            Phase::Conda,
            Phase::FreeSurfer,
            Phase::FastSurfer,
            Phase::MeldGraph,
            Phase::Bindings,
            Phase::Permissions,
            Phase::Entrypoint,
        ];

        for phase in phases {
            assert!(Phase::Layout < phase, "Layout must come before {:?}", phase);
        }
    }

    /// Phase is repr(u8), one byte.
    #[test]
    fn test_phase_size() {
        assert_eq!(std::mem::size_of::<Phase>(), 1);
    }

    /// Op uses &'static data throughout; keep it pointer-sized, not
    /// allocation-happy.
    #[test]
    fn test_op_stays_compact() {
        let size = std::mem::size_of::<Op>();
        assert!(size <= 48, "Op grew too large: {} bytes", size);
    }
}
