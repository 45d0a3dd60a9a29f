//! Session container lifecycle.
//!
//! Reconciles the single named container towards `Running` with the least
//! work possible:
//!
//! ```text
//! inspect(name)
//!   Running                          -> done, nothing touched
//!   Stopped | Absent | Indeterminate -> rebuild
//! rebuild
//!   remove(name)        best-effort, failure logged and ignored
//!   archive(root)       -> build context
//!   build(context)      log streamed to the user, any error is fatal
//!   create(name, bind)  -> id
//!   start(id)
//! ```
//!
//! An inspect failure is handled like a missing container: the manager
//! converges to a fresh running container rather than returning an error.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::archive;
use crate::config::{LauncherConfig, ProjectConfig};
use crate::engine::{BuildEvent, BuildRequest, ContainerEngine, ContainerSpec, ContainerState};
use crate::error::{ArchiveError, EngineError, LifecycleError};
use crate::lock::SessionLock;

/// What a fresh inspect says about the session container.
#[derive(Debug)]
pub enum Observed {
    Running,
    Stopped,
    Absent,
    /// The engine could not answer. Handled exactly like `Absent`.
    Indeterminate(EngineError),
}

/// Outcome of [`LifecycleManager::ensure_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The container was already running; no engine mutations were made.
    AlreadyRunning,
    /// The image was rebuilt and a new container started.
    Rebuilt { container_id: String },
}

/// Drives the session container towards `Running`.
pub struct LifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    settings: LauncherConfig,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: LauncherConfig) -> Self {
        Self { engine, settings }
    }

    /// Session identity: container name and image tag.
    pub fn identity(&self) -> &str {
        &self.settings.container_name
    }

    /// Inspect the container now. Never cached.
    pub async fn observe(&self) -> Observed {
        match self.engine.inspect(self.identity()).await {
            Ok(ContainerState::Running) => Observed::Running,
            Ok(ContainerState::Stopped) => Observed::Stopped,
            Ok(ContainerState::Absent) => Observed::Absent,
            Err(e) => Observed::Indeterminate(e),
        }
    }

    /// Guarantee the session container is running on return.
    ///
    /// Holds the per-identity session lock for the whole reconcile. Build
    /// output is written to `build_log` as it arrives.
    pub async fn ensure_running<W>(
        &self,
        project_root: &Path,
        project: &ProjectConfig,
        force_rebuild: bool,
        build_log: &mut W,
    ) -> Result<Reconciled, LifecycleError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let _lock = SessionLock::acquire(&self.settings.lock_dir, self.identity()).await?;

        match self.observe().await {
            Observed::Running if !force_rebuild => {
                tracing::debug!(container = %self.identity(), "Container already running");
                return Ok(Reconciled::AlreadyRunning);
            }
            Observed::Running => {
                tracing::info!(container = %self.identity(), "Rebuild requested for running container");
            }
            Observed::Stopped => {
                tracing::info!(container = %self.identity(), "Container stopped, rebuilding");
            }
            Observed::Absent => {
                tracing::info!(container = %self.identity(), "Container absent, building");
            }
            Observed::Indeterminate(e) => {
                tracing::warn!(
                    container = %self.identity(),
                    "Could not inspect container ({}), rebuilding",
                    e
                );
            }
        }

        let container_id = self.rebuild(project_root, project, build_log).await?;
        Ok(Reconciled::Rebuilt { container_id })
    }

    /// Remove the session container.
    ///
    /// Returns `Ok(false)` when there was nothing to remove.
    pub async fn remove(&self) -> Result<bool, EngineError> {
        match self.engine.remove(self.identity()).await {
            Ok(()) => Ok(true),
            Err(EngineError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn rebuild<W>(
        &self,
        project_root: &Path,
        project: &ProjectConfig,
        build_log: &mut W,
    ) -> Result<String, LifecycleError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        // Best-effort: a missing container is the common case here.
        match self.remove().await {
            Ok(true) => tracing::debug!(container = %self.identity(), "Removed old container"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                container = %self.identity(),
                "Failed to remove old container, continuing: {}",
                e
            ),
        }

        let context = build_context(project_root).await?;
        self.build_image(context, project, build_log).await?;

        let spec = ContainerSpec {
            name: self.identity().to_string(),
            image: self.identity().to_string(),
            command: self.settings.keepalive.clone(),
            binds: vec![self.settings.bind_for(project_root)],
        };
        let container_id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(LifecycleError::CreateFailed)?;
        tracing::debug!(container = %self.identity(), id = %container_id, "Container created");

        self.engine
            .start_container(&container_id)
            .await
            .map_err(LifecycleError::StartFailed)?;
        tracing::info!(container = %self.identity(), id = %container_id, "Container started");

        Ok(container_id)
    }

    async fn build_image<W>(
        &self,
        context: Bytes,
        project: &ProjectConfig,
        build_log: &mut W,
    ) -> Result<(), LifecycleError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let request = BuildRequest {
            context,
            dockerfile: project.dockerfile.clone(),
            tag: self.identity().to_string(),
        };
        let mut events = self.engine.build_image(request);

        while let Some(event) = events.next().await {
            match event {
                Ok(BuildEvent::Output(text)) => {
                    if let Err(e) = build_log.write_all(text.as_bytes()).await {
                        tracing::debug!("Build log sink closed: {}", e);
                    }
                }
                Ok(BuildEvent::Error(message)) => {
                    return Err(LifecycleError::BuildFailed(message));
                }
                Err(e) => return Err(LifecycleError::BuildFailed(e.to_string())),
            }
        }

        if let Err(e) = build_log.flush().await {
            tracing::debug!("Build log sink closed: {}", e);
        }
        Ok(())
    }
}

/// Archive the project root on the blocking pool.
async fn build_context(project_root: &Path) -> Result<Bytes, LifecycleError> {
    let root = project_root.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || archive::archive_to_vec(&root))
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))??;
    tracing::debug!(bytes = archive.len(), "Build context ready");
    Ok(Bytes::from(archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, project_dir};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    struct Fixture {
        engine: Arc<FakeEngine>,
        manager: LifecycleManager,
        project: tempfile::TempDir,
        _locks: tempfile::TempDir,
    }

    impl Fixture {
        fn new(engine: FakeEngine) -> Self {
            let engine = engine.into_arc();
            let locks = tempfile::tempdir().unwrap();
            let settings = LauncherConfig {
                lock_dir: locks.path().to_path_buf(),
                ..LauncherConfig::default()
            };
            Self {
                manager: LifecycleManager::new(engine.clone(), settings),
                engine,
                project: project_dir(),
                _locks: locks,
            }
        }

        async fn ensure(&self, force_rebuild: bool) -> (Result<Reconciled, LifecycleError>, Vec<u8>) {
            let project = ProjectConfig::load(self.project.path()).unwrap();
            let mut log = Vec::new();
            let result = self
                .manager
                .ensure_running(self.project.path(), &project, force_rebuild, &mut log)
                .await;
            (result, log)
        }
    }

    #[tokio::test]
    async fn test_absent_container_is_built_created_and_started() {
        let fx = Fixture::new(FakeEngine::default());

        let (result, log) = fx.ensure(false).await;

        assert_eq!(
            result.unwrap(),
            Reconciled::Rebuilt {
                container_id: "gantry-1".to_string()
            }
        );
        assert_eq!(
            fx.engine.call_log(),
            vec!["inspect", "remove", "build_image", "create_container", "start_container"]
        );
        assert_eq!(fx.engine.state(), ContainerState::Running);
        assert_eq!(log, b"Successfully built\n");

        let builds = fx.engine.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].tag, "gantry");
        assert_eq!(builds[0].dockerfile, "Dockerfile");
        assert_eq!(&builds[0].context[..2], &[0x1f, 0x8b]);

        assert_eq!(
            fx.engine.containers(),
            vec![ContainerSpec {
                name: "gantry".to_string(),
                image: "gantry".to_string(),
                command: vec!["sleep".to_string(), "10000000".to_string()],
                binds: vec![format!("{}:/opt", fx.project.path().display())],
            }]
        );
    }

    #[tokio::test]
    async fn test_running_container_is_left_alone() {
        let fx = Fixture::new(FakeEngine::default().with_state(ContainerState::Running));

        let (result, log) = fx.ensure(false).await;

        assert_eq!(result.unwrap(), Reconciled::AlreadyRunning);
        assert_eq!(fx.engine.call_log(), vec!["inspect"]);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_second_reconcile_does_no_work() {
        let fx = Fixture::new(FakeEngine::default());

        fx.ensure(false).await.0.unwrap();
        let (second, _) = fx.ensure(false).await;

        assert_eq!(second.unwrap(), Reconciled::AlreadyRunning);
        assert_eq!(fx.engine.calls("build_image"), 1);
        assert_eq!(fx.engine.calls("create_container"), 1);
        assert_eq!(fx.engine.calls("start_container"), 1);
        assert_eq!(fx.engine.calls("inspect"), 2);
    }

    #[tokio::test]
    async fn test_stopped_container_is_removed_before_rebuild() {
        let fx = Fixture::new(FakeEngine::default().with_state(ContainerState::Stopped));

        fx.ensure(false).await.0.unwrap();

        assert_eq!(
            fx.engine.call_log(),
            vec!["inspect", "remove", "build_image", "create_container", "start_container"]
        );
        assert_eq!(fx.engine.state(), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_inspect_failure_converges_to_running() {
        let fx = Fixture::new(FakeEngine::default().failing("inspect"));

        let (result, _) = fx.ensure(false).await;

        assert!(matches!(result, Ok(Reconciled::Rebuilt { .. })));
        assert_eq!(fx.engine.calls("start_container"), 1);
    }

    #[tokio::test]
    async fn test_force_rebuild_replaces_running_container() {
        let fx = Fixture::new(FakeEngine::default().with_state(ContainerState::Running));

        let (result, _) = fx.ensure(true).await;

        assert!(matches!(result, Ok(Reconciled::Rebuilt { .. })));
        assert_eq!(fx.engine.calls("remove"), 1);
        assert_eq!(fx.engine.calls("build_image"), 1);
    }

    #[tokio::test]
    async fn test_build_error_stops_before_create() {
        let fx = Fixture::new(FakeEngine::default().with_build_events(vec![
            BuildEvent::Output("Step 1/2 : FROM alpine\n".to_string()),
            BuildEvent::Error("COPY failed: no such file".to_string()),
            BuildEvent::Output("never shown\n".to_string()),
        ]));

        let (result, log) = fx.ensure(false).await;

        match result {
            Err(LifecycleError::BuildFailed(message)) => {
                assert_eq!(message, "COPY failed: no such file")
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
        assert_eq!(log, b"Step 1/2 : FROM alpine\n");
        assert_eq!(fx.engine.calls("create_container"), 0);
        assert_eq!(fx.engine.calls("start_container"), 0);
    }

    #[tokio::test]
    async fn test_build_transport_error_is_build_failure() {
        let fx = Fixture::new(FakeEngine::default().failing("build_image"));

        let (result, _) = fx.ensure(false).await;

        assert!(matches!(result, Err(LifecycleError::BuildFailed(_))));
        assert_eq!(fx.engine.calls("create_container"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_skips_start() {
        let fx = Fixture::new(FakeEngine::default().failing("create_container"));

        let (result, _) = fx.ensure(false).await;

        assert!(matches!(result, Err(LifecycleError::CreateFailed(_))));
        assert_eq!(fx.engine.calls("start_container"), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let fx = Fixture::new(FakeEngine::default().failing("start_container"));

        let (result, _) = fx.ensure(false).await;

        assert!(matches!(result, Err(LifecycleError::StartFailed(_))));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_remove_failure_is_logged_and_ignored() {
        let fx = Fixture::new(
            FakeEngine::default()
                .with_state(ContainerState::Stopped)
                .failing("remove"),
        );

        let (result, _) = fx.ensure(false).await;

        assert!(matches!(result, Ok(Reconciled::Rebuilt { .. })));
        assert!(logs_contain("Failed to remove old container"));
    }

    #[tokio::test]
    async fn test_remove_reports_whether_anything_was_removed() {
        let fx = Fixture::new(FakeEngine::default().with_state(ContainerState::Stopped));

        assert!(fx.manager.remove().await.unwrap());
        assert!(!fx.manager.remove().await.unwrap());
    }

    /// Accepts writes but refuses to flush, like a closed terminal.
    struct UnflushableLog;

    impl AsyncWrite for UnflushableLog {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unflushable_build_log_does_not_fail_rebuild() {
        let fx = Fixture::new(FakeEngine::default());
        let project = ProjectConfig::load(fx.project.path()).unwrap();

        let result = fx
            .manager
            .ensure_running(fx.project.path(), &project, false, &mut UnflushableLog)
            .await;

        assert!(matches!(result, Ok(Reconciled::Rebuilt { .. })));
        assert!(logs_contain("Build log sink closed"));
    }
}
