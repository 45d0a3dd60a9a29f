use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use crate::bridge::LocalIo;
use crate::config::LauncherConfig;
use crate::engine::connect_engine;
use crate::error::Error;
use crate::session::{Orchestrator, RunRequest};
use crate::terminal::CrosstermTerminal;

/// Run a command in the session container
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Project root (default: nearest directory containing gantry.yml)
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Rebuild the image even if the container is running
    #[arg(long)]
    pub rebuild: bool,

    /// Command and arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Run one session and return the process exit code.
pub async fn run_run_command(args: RunArgs) -> anyhow::Result<i32> {
    let project_root = super::resolve_project_root(args.project.as_deref())?;
    let settings = LauncherConfig::from_env()?;
    let engine = connect_engine().await.map_err(Error::from)?;

    let orchestrator = Orchestrator::new(
        Arc::new(engine),
        Arc::new(CrosstermTerminal::detect()),
        settings,
    );
    let report = orchestrator
        .run(
            RunRequest {
                project_root,
                command: args.command,
                force_rebuild: args.rebuild,
            },
            LocalIo::stdio(),
        )
        .await?;

    tracing::debug!(
        reconciled = ?report.reconciled,
        end = ?report.outcome.end,
        "Session finished"
    );
    Ok(report.exit_code())
}
