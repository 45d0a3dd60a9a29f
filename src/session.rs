//! Session orchestration: archive, ensure running, exec, restore.
//!
//! One [`Orchestrator::run`] call is one session. Project configuration is
//! read fresh, the container is reconciled under the session lock, then the
//! requested command is attached to the local terminal.

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive;
use crate::bridge::{ExecBridge, LocalIo, SessionEnd, SessionOutcome};
use crate::config::{LauncherConfig, ProjectConfig};
use crate::engine::{ContainerEngine, ExecSpec};
use crate::error::{ArchiveError, Error, ExecError};
use crate::lifecycle::{LifecycleManager, Reconciled};
use crate::terminal::TerminalMode;

/// What to run and where.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Project root containing `gantry.yml`; bind-mounted into the container.
    pub project_root: PathBuf,
    /// Command and arguments to execute inside the container.
    pub command: Vec<String>,
    /// Rebuild even when the container is already running.
    pub force_rebuild: bool,
}

/// Summary of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reconciled: Reconciled,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    /// Process exit code for this session.
    ///
    /// Signal and input-closed endings are clean exits; when the remote side
    /// ended the session its exit code is passed through.
    pub fn exit_code(&self) -> i32 {
        match self.outcome.end {
            SessionEnd::OutputClosed => self
                .outcome
                .exit_code
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or(0),
            SessionEnd::Signal | SessionEnd::InputClosed => 0,
        }
    }
}

/// Sequences the lifecycle manager and the exec bridge.
pub struct Orchestrator {
    settings: LauncherConfig,
    lifecycle: LifecycleManager,
    bridge: ExecBridge,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        terminal: Arc<dyn TerminalMode>,
        settings: LauncherConfig,
    ) -> Self {
        Self {
            lifecycle: LifecycleManager::new(engine.clone(), settings.clone()),
            bridge: ExecBridge::new(engine, terminal),
            settings,
        }
    }

    /// Run one session end to end.
    ///
    /// Build output goes to `io.stdout` before the exec starts.
    pub async fn run(&self, request: RunRequest, mut io: LocalIo) -> Result<SessionReport, Error> {
        if request.command.is_empty() {
            return Err(ExecError::SetupFailed {
                reason: "no command given".to_string(),
            }
            .into());
        }

        archive::check_source(&request.project_root)?;
        let project_root = request
            .project_root
            .canonicalize()
            .map_err(|source| ArchiveError::SourceNotFound {
                path: request.project_root.clone(),
                source,
            })?;
        let project = ProjectConfig::load(&project_root)?;
        tracing::debug!(
            root = %project_root.display(),
            dockerfile = %project.dockerfile,
            "Project loaded"
        );

        let reconciled = self
            .lifecycle
            .ensure_running(&project_root, &project, request.force_rebuild, &mut io.stdout)
            .await?;

        let spec = ExecSpec {
            command: request.command,
            working_dir: Some(self.settings.mount_path.clone()),
            tty: true,
        };
        let outcome = self
            .bridge
            .run(self.lifecycle.identity(), &spec, io)
            .await?;

        Ok(SessionReport {
            reconciled,
            outcome,
        })
    }
}
