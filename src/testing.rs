//! In-memory doubles shared by unit tests.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::io::AsyncWrite;

use crate::engine::{
    BuildEvent, BuildRequest, ContainerEngine, ContainerSpec, ContainerState, ExecSpec,
    ExecStreams, OutputChunk,
};
use crate::error::EngineError;

/// A build the fake engine was asked to run.
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub context: Vec<u8>,
    pub dockerfile: String,
    pub tag: String,
}

#[derive(Debug)]
struct Inner {
    state: ContainerState,
    failing: HashSet<&'static str>,
    build_events: Vec<BuildEvent>,
    /// `None` keeps the exec output open forever.
    output: Option<Vec<OutputChunk>>,
    exit_code: Option<i64>,
    calls: Vec<&'static str>,
    builds: Vec<RecordedBuild>,
    containers: Vec<ContainerSpec>,
    execs: Vec<(String, ExecSpec)>,
    resizes: Vec<(u16, u16)>,
}

/// Container engine that keeps one container's state in memory and records
/// every call made to it.
#[derive(Debug)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ContainerState::Absent,
                failing: HashSet::new(),
                build_events: vec![BuildEvent::Output("Successfully built\n".to_string())],
                output: Some(Vec::new()),
                exit_code: Some(0),
                calls: Vec::new(),
                builds: Vec::new(),
                containers: Vec::new(),
                execs: Vec::new(),
                resizes: Vec::new(),
            }),
        }
    }
}

impl FakeEngine {
    pub fn with_state(self, state: ContainerState) -> Self {
        self.inner.lock().unwrap().state = state;
        self
    }

    /// Make `operation` fail every time it is called.
    pub fn failing(self, operation: &'static str) -> Self {
        self.inner.lock().unwrap().failing.insert(operation);
        self
    }

    pub fn with_build_events(self, events: Vec<BuildEvent>) -> Self {
        self.inner.lock().unwrap().build_events = events;
        self
    }

    pub fn with_output(self, chunks: Vec<OutputChunk>, exit_code: Option<i64>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.output = Some(chunks);
            inner.exit_code = exit_code;
        }
        self
    }

    pub fn with_pending_output(self) -> Self {
        self.inner.lock().unwrap().output = None;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn state(&self) -> ContainerState {
        self.inner.lock().unwrap().state
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.call_log().iter().filter(|c| **c == operation).count()
    }

    pub fn builds(&self) -> Vec<RecordedBuild> {
        self.inner.lock().unwrap().builds.clone()
    }

    pub fn containers(&self) -> Vec<ContainerSpec> {
        self.inner.lock().unwrap().containers.clone()
    }

    pub fn execs(&self) -> Vec<(String, ExecSpec)> {
        self.inner.lock().unwrap().execs.clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.inner.lock().unwrap().resizes.clone()
    }

    /// Record the call and report whether it was set up to fail.
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, Inner>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(operation);
        if inner.failing.contains(operation) {
            return Err(EngineError::Request {
                operation,
                reason: "injected failure".to_string(),
            });
        }
        Ok(inner)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect(&self, _name: &str) -> Result<ContainerState, EngineError> {
        let inner = self.enter("inspect")?;
        Ok(inner.state)
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        let mut inner = self.enter("remove")?;
        if inner.state == ContainerState::Absent {
            return Err(EngineError::NotFound(name.to_string()));
        }
        inner.state = ContainerState::Absent;
        Ok(())
    }

    fn build_image(&self, request: BuildRequest) -> BoxStream<'_, Result<BuildEvent, EngineError>> {
        let events = match self.enter("build_image") {
            Ok(mut inner) => {
                inner.builds.push(RecordedBuild {
                    context: request.context.to_vec(),
                    dockerfile: request.dockerfile,
                    tag: request.tag,
                });
                inner.build_events.iter().cloned().map(Ok).collect()
            }
            Err(e) => vec![Err(e)],
        };
        stream::iter(events).boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut inner = self.enter("create_container")?;
        inner.containers.push(spec.clone());
        inner.state = ContainerState::Stopped;
        Ok(format!("{}-{}", spec.name, inner.containers.len()))
    }

    async fn start_container(&self, _id: &str) -> Result<(), EngineError> {
        let mut inner = self.enter("start_container")?;
        inner.state = ContainerState::Running;
        Ok(())
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let mut inner = self.enter("create_exec")?;
        inner.execs.push((container.to_string(), spec.clone()));
        Ok(format!("exec-{}", inner.execs.len()))
    }

    async fn attach_exec(&self, _exec_id: &str) -> Result<ExecStreams, EngineError> {
        let inner = self.enter("attach_exec")?;
        let output = match &inner.output {
            Some(chunks) => stream::iter(chunks.clone().into_iter().map(Ok)).boxed(),
            None => stream::pending().boxed(),
        };
        Ok(ExecStreams {
            input: Box::pin(tokio::io::sink()),
            output,
        })
    }

    async fn resize_exec(&self, _exec_id: &str, width: u16, height: u16) -> Result<(), EngineError> {
        let mut inner = self.enter("resize_exec")?;
        inner.resizes.push((width, height));
        Ok(())
    }

    async fn exec_exit_code(&self, _exec_id: &str) -> Result<Option<i64>, EngineError> {
        let inner = self.enter("exec_exit_code")?;
        Ok(inner.exit_code)
    }
}

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedBuf {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A project root with `gantry.yml` and a Dockerfile.
pub fn project_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "gantry.yml", "dockerfile: Dockerfile\ncommands:\n  - test\n");
    write(dir.path(), "Dockerfile", "FROM alpine:3.20\n");
    write(dir.path(), "src/main.rs", "fn main() {}\n");
    dir
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
