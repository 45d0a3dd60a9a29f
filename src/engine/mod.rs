//! Container engine client boundary.
//!
//! The lifecycle manager and the exec bridge only talk to the engine through
//! [`ContainerEngine`]. [`docker::DockerEngine`] implements it over the Docker
//! API (which Podman also serves); tests substitute a recording fake.

pub mod detect;
pub mod docker;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::error::EngineError;

pub use detect::{EngineReport, diagnose_engine};
pub use docker::{DockerEngine, Endpoint, connect_engine, locate_engine};

/// Observed state of a named container.
///
/// Always derived from a fresh inspect call, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Stopped,
    Running,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerState::Absent => "absent",
            ContainerState::Stopped => "stopped",
            ContainerState::Running => "running",
        })
    }
}

/// Image build request. The context is consumed by exactly one build.
#[derive(Debug)]
pub struct BuildRequest {
    /// Gzip-compressed tar of the project root.
    pub context: Bytes,
    /// Dockerfile path relative to the context root.
    pub dockerfile: String,
    /// Tag applied to the resulting image.
    pub tag: String,
}

/// One event from an image build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Log text to show the user as-is.
    Output(String),
    /// The build reported a failure.
    Error(String),
}

/// Container creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Bind mounts in `host:container` form.
    pub binds: Vec<String>,
}

/// Interactive exec parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
}

/// A chunk of remote output, tagged with the stream it belongs on locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// Duplex channel to a started exec.
pub struct ExecStreams {
    /// Local stdin is copied here.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    /// Remote stdout and stderr, demultiplexed, in the order produced.
    pub output: BoxStream<'static, Result<OutputChunk, EngineError>>,
}

impl fmt::Debug for ExecStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStreams").finish_non_exhaustive()
    }
}

/// Operations the session needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Inspect a container by name.
    ///
    /// A container the engine does not know is `Ok(Absent)`; any other
    /// failure is an error the caller decides how to treat.
    async fn inspect(&self, name: &str) -> Result<ContainerState, EngineError>;

    /// Force-remove a container by name.
    async fn remove(&self, name: &str) -> Result<(), EngineError>;

    /// Build an image, streaming its log.
    fn build_image(
        &self,
        request: BuildRequest,
    ) -> BoxStream<'_, Result<BuildEvent, EngineError>>;

    /// Create a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Create an exec inside a running container, returning the exec id.
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError>;

    /// Start an exec and attach to its stdin and combined output.
    async fn attach_exec(&self, exec_id: &str) -> Result<ExecStreams, EngineError>;

    /// Resize an exec's pseudo-terminal.
    async fn resize_exec(&self, exec_id: &str, width: u16, height: u16)
    -> Result<(), EngineError>;

    /// Exit code of a finished exec, if the engine knows it.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, EngineError>;
}
