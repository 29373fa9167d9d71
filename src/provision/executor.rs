//! Step executor - interprets Op variants and performs actual operations.
//!
//! This is the single place where provisioning operations are implemented.
//! Any op that fails aborts the step, and with it the whole sequence.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;

use super::{Op, ProvisionContext, Step};
use crate::process::Cmd;

/// Execute all operations in a step, in definition order.
pub fn execute(ctx: &mut ProvisionContext, step: &Step) -> Result<()> {
    println!("Applying {}...", step.name);

    for op in step.ops.iter() {
        execute_op(ctx, op).with_context(|| format!("in step '{}': {:?}", step.name, op))?;
    }

    Ok(())
}

/// Execute a single operation.
fn execute_op(ctx: &mut ProvisionContext, op: &Op) -> Result<()> {
    match op {
        // ─────────────────────────────────────────────────────────────────
        // Directory operations
        // ─────────────────────────────────────────────────────────────────
        Op::Dir(path) => {
            fs::create_dir_all(ctx.image_path(path))?;
        }

        Op::Dirs(paths) => {
            for path in *paths {
                fs::create_dir_all(ctx.image_path(path))?;
            }
        }

        Op::DirMode(path, mode) => {
            let full_path = ctx.image_path(path);
            fs::create_dir_all(&full_path)?;
            fs::set_permissions(&full_path, fs::Permissions::from_mode(*mode))?;
        }

        // ─────────────────────────────────────────────────────────────────
        // File operations
        // ─────────────────────────────────────────────────────────────────
        Op::WriteFile(path, content) => {
            let full_path = ctx.image_path(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full_path, content)?;
        }

        Op::WriteFileMode(path, content, mode) => {
            let full_path = ctx.image_path(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full_path, content)?;
            fs::set_permissions(&full_path, fs::Permissions::from_mode(*mode))?;
        }

        // ─────────────────────────────────────────────────────────────────
        // Ordering guards
        // ─────────────────────────────────────────────────────────────────
        Op::Require(path, hint) => {
            let full_path = ctx.image_path(path);
            if !full_path.exists() {
                bail!("{} missing from image root. {}", path, hint);
            }
        }

        // ─────────────────────────────────────────────────────────────────
        // External commands
        // ─────────────────────────────────────────────────────────────────
        Op::Run(program, args) => {
            Cmd::new(*program)
                .args(args.iter().copied())
                .dir(&ctx.staging)
                .error_msg(format!("'{}' provisioning command failed", program))
                .run()?;
        }

        // ─────────────────────────────────────────────────────────────────
        // Custom operations (dispatch to custom.rs)
        // ─────────────────────────────────────────────────────────────────
        Op::Custom(custom_op) => {
            super::custom::execute(ctx, *custom_op)?;
        }
    }

    Ok(())
}
