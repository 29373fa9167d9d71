//! Sequence runner - applies steps in strict order with fail-fast abort.
//!
//! The run is a linear chain: `Pending → Running(i) → Running(i+1) → … →
//! Complete`, with a single absorbing `Failed(i)` reachable from any
//! `Running(i)` when a step errors. Step *i+1* never begins before step *i*
//! completes, because later steps depend on filesystem state established by
//! earlier ones. There is no retry and no rollback: a failed run leaves the
//! in-progress root behind for inspection, and a fresh run starts from the
//! first step.

use anyhow::{Context, Result};

use super::{executor, ProvisionContext, Step};
use crate::timing::Timer;

/// Where a sequence run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Not started.
    Pending,
    /// Step at this index is executing.
    Running(usize),
    /// Every step applied successfully.
    Complete,
    /// Aborted at the step at this index. Absorbing.
    Failed(usize),
}

/// An ordered provisioning sequence.
pub struct Sequence {
    steps: Vec<Step>,
    state: SequenceState,
}

impl Sequence {
    /// Create a sequence from ordered steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            state: SequenceState::Pending,
        }
    }

    /// Current state.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// The steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Apply every step in order against the context.
    ///
    /// The first failing step aborts the run; no later step executes.
    pub fn run(&mut self, ctx: &mut ProvisionContext) -> Result<()> {
        let total = self.steps.len();
        for index in 0..total {
            self.state = SequenceState::Running(index);
            let step = self.steps[index].clone();

            let timer = Timer::start(step.name);
            ctx.applied.push(step.name);

            if let Err(e) = executor::execute(ctx, &step) {
                self.state = SequenceState::Failed(index);
                return Err(e).with_context(|| {
                    format!(
                        "Provisioning aborted at step {}/{} ('{}')",
                        index + 1,
                        total,
                        step.name
                    )
                });
            }
            timer.finish();
        }

        self.state = SequenceState::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provision::{Op, Phase};
    use std::fs;
    use tempfile::TempDir;

    fn test_ctx(temp: &TempDir) -> ProvisionContext {
        let base = temp.path();
        let staging = base.join("image");
        let downloads = base.join("downloads");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&downloads).unwrap();
        ProvisionContext::for_testing(&staging, &downloads, base, Config::load(base))
    }

    fn ok_step(name: &'static str, marker_ops: &'static [Op]) -> Step {
        Step {
            name,
            phase: Phase::Layout,
            ops: marker_ops,
        }
    }

    #[test]
    fn test_new_sequence_is_pending() {
        let seq = Sequence::new(vec![]);
        assert_eq!(seq.state(), SequenceState::Pending);
    }

    #[test]
    fn test_empty_sequence_completes() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_ctx(&temp);
        let mut seq = Sequence::new(vec![]);

        seq.run(&mut ctx).unwrap();
        assert_eq!(seq.state(), SequenceState::Complete);
    }

    #[test]
    fn test_all_steps_apply_in_order() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_ctx(&temp);

        let mut seq = Sequence::new(vec![
            ok_step("first", &[Op::Dir("one")]),
            ok_step("second", &[Op::Require("one", "first step must run before second")]),
            ok_step("third", &[Op::Dir("two")]),
        ]);

        seq.run(&mut ctx).unwrap();
        assert_eq!(seq.state(), SequenceState::Complete);
        assert_eq!(ctx.applied, vec!["first", "second", "third"]);
        assert!(ctx.image_path("one").is_dir());
        assert!(ctx.image_path("two").is_dir());
    }

    #[test]
    fn test_failed_step_halts_sequence() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_ctx(&temp);

        let mut seq = Sequence::new(vec![
            ok_step("good", &[Op::Dir("applied")]),
            ok_step("bad", &[Op::Run("false", &[])]),
            ok_step("never", &[Op::Dir("not-applied")]),
        ]);

        let err = seq.run(&mut ctx).unwrap_err();
        let msg = format!("{:#}", err);

        // Absorbing failure state at the failing index
        assert_eq!(seq.state(), SequenceState::Failed(1));
        // The error names the exact failing step
        assert!(msg.contains("'bad'"), "got: {msg}");
        assert!(msg.contains("step 2/3"), "got: {msg}");
        // No later step executed
        assert!(ctx.image_path("applied").is_dir());
        assert!(!ctx.image_path("not-applied").exists());
    }

    #[test]
    fn test_first_step_failure() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_ctx(&temp);

        let mut seq = Sequence::new(vec![
            ok_step("bad", &[Op::Require("nonexistent", "no earlier step provides this")]),
            ok_step("never", &[Op::Dir("not-applied")]),
        ]);

        assert!(seq.run(&mut ctx).is_err());
        assert_eq!(seq.state(), SequenceState::Failed(0));
        assert!(!ctx.image_path("not-applied").exists());
    }

    #[test]
    fn test_out_of_order_dependency_fails_at_that_step() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_ctx(&temp);

        // "consumer" placed before "producer": must fail at consumer rather
        // than silently succeed.
        let mut seq = Sequence::new(vec![
            ok_step("consumer", &[Op::Require("produced", "run producer first")]),
            ok_step("producer", &[Op::Dir("produced")]),
        ]);

        let err = seq.run(&mut ctx).unwrap_err();
        assert_eq!(seq.state(), SequenceState::Failed(0));
        assert!(format!("{:#}", err).contains("produced"));
    }
}
