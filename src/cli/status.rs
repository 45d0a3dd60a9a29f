//! Engine and container diagnostics for `gantry status`.
//!
//! Reports engine availability, the session identity, the observed container
//! state and whether a reconcile currently holds the session lock.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use crate::config::{LauncherConfig, PROJECT_FILE, ProjectConfig};
use crate::engine::{EngineReport, diagnose_engine};
use crate::lifecycle::{LifecycleManager, Observed};
use crate::lock::SessionLock;

/// Show engine and container status
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Project root (default: nearest directory containing gantry.yml)
    #[arg(long)]
    pub project: Option<PathBuf>,
}

/// Run the status command, printing engine and container state.
pub async fn run_status_command(args: &StatusArgs) -> anyhow::Result<()> {
    let settings = LauncherConfig::from_env()?;

    println!("Gantry Status");
    println!("=============\n");

    println!(
        "  Version:     {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    // Project
    print!("  Project:     ");
    match super::resolve_project_root(args.project.as_deref()) {
        Ok(root) => match ProjectConfig::load(&root) {
            Ok(project) => {
                println!("{}", root.display());
                println!("  Dockerfile:  {}", project.dockerfile);
                if !project.commands.is_empty() {
                    println!("  Commands:    {}", project.commands.join(", "));
                }
            }
            Err(e) => println!("error ({})", e),
        },
        Err(_) => println!("no {} found", PROJECT_FILE),
    }

    println!("  Identity:    {}", settings.container_name);
    println!("  Mount:       {}", settings.mount_path);

    // Engine
    let report = diagnose_engine().await;
    println!("  Engine:      {}", report.summary());

    // Container
    print!("  Container:   ");
    if let EngineReport::Reachable { engine, .. } = &report {
        let manager = LifecycleManager::new(Arc::new(engine.clone()), settings.clone());
        match manager.observe().await {
            Observed::Running => println!("running"),
            Observed::Stopped => println!("stopped"),
            Observed::Absent => println!("absent"),
            Observed::Indeterminate(e) => println!("unknown ({})", e),
        }
    } else {
        println!("unknown (engine unavailable)");
    }

    // Lock
    print!("  Lock:        ");
    match SessionLock::try_acquire(&settings.lock_dir, &settings.container_name) {
        Ok(Some(_)) => println!("free"),
        Ok(None) => println!("held (reconcile in progress)"),
        Err(e) => println!("error ({})", e),
    }

    if let Some(hint) = report.hint() {
        println!("\n  {}", hint);
    }

    Ok(())
}
