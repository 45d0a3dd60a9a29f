//! Command-line surface.

mod down;
mod run;
mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::ProjectConfig;

pub use down::run_down_command;
pub use run::{RunArgs, run_run_command};
pub use status::{StatusArgs, run_status_command};

#[derive(Parser, Debug)]
#[command(
    name = "gantry",
    version,
    about = "Run project commands inside a long-lived development container"
)]
pub struct Cli {
    /// Log engine and lifecycle activity to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ensure the container is running and execute a command in it.
    Run(RunArgs),
    /// Show engine availability and container state.
    Status(StatusArgs),
    /// Remove the session container.
    Down,
}

/// Explicit project root, or the nearest ancestor holding `gantry.yml`.
pub(crate) fn resolve_project_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(ProjectConfig::discover_root(&cwd)?)
}
