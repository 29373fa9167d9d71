//! meldbox - MELD runtime image provisioner.
//!
//! Assembles the filesystem root for the MELD graph lesion-detection
//! pipeline: FreeSurfer, Miniconda, FastSurfer and the meld_graph package,
//! plus the environment bindings and runtime entrypoint the containerised
//! pipeline expects.
#![allow(dead_code)]

mod artifact;
mod commands;
mod config;
mod fetch;
mod manifest;
mod preflight;
mod process;
mod provision;
mod timing;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::Config;

#[derive(Parser)]
#[command(name = "meldbox")]
#[command(about = "MELD runtime image provisioner")]
#[command(
    after_help = "QUICK START:\n  meldbox preflight  Check host tools and artifact pins\n  meldbox provision  Build the image root\n  meldbox start      Run the provisioned entrypoint\n  meldbox clean      Remove the staging root"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the image root (fetches artifacts automatically)
    Provision {
        /// Skip preflight checks
        #[arg(long)]
        no_preflight: bool,
    },

    /// Download and verify archive artifacts without provisioning
    Fetch {
        #[command(subcommand)]
        what: Option<FetchTarget>,
    },

    /// Run preflight checks (host tools, pins, environment)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Run the provisioned image's entrypoint
    Start,

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Clean provisioning outputs (default: staging root only)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },
}

#[derive(Subcommand)]
enum FetchTarget {
    /// Miniconda installer
    Conda,
    /// FreeSurfer tarball
    Freesurfer,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show effective configuration
    Config,
    /// Show the provisioned root's manifest
    Manifest,
    /// Show provisioning status (what is done, what is pending)
    Status,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Staging image root only
    Staging,
    /// Downloaded archives
    Downloads,
    /// User-level cache (~/.cache/meldbox)
    Cache,
    /// Everything (staging + downloads + cache)
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Provision { no_preflight } => {
            commands::cmd_provision(&base_dir, &config, no_preflight)?;
        }

        Commands::Fetch { what } => {
            let target = match what {
                None => commands::fetch::FetchTarget::All,
                Some(FetchTarget::Conda) => commands::fetch::FetchTarget::Conda,
                Some(FetchTarget::Freesurfer) => commands::fetch::FetchTarget::FreeSurfer,
            };
            commands::cmd_fetch(&config, target)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Start => {
            commands::cmd_start(&config)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Manifest => commands::show::ShowTarget::Manifest,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(&config, target)?;
        }

        Commands::Clean { what } => {
            let target = match what {
                None => commands::clean::CleanTarget::Staging,
                Some(CleanTarget::Staging) => commands::clean::CleanTarget::Staging,
                Some(CleanTarget::Downloads) => commands::clean::CleanTarget::Downloads,
                Some(CleanTarget::Cache) => commands::clean::CleanTarget::Cache,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, target)?;
        }
    }

    Ok(())
}
