//! Docker API implementation of [`ContainerEngine`].
//!
//! Podman serves the same API, so the same client works against either
//! daemon once a socket has been found.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::{BuildInfo, HostConfig};
use futures::stream::BoxStream;
use futures::{StreamExt, future};

use crate::engine::{
    BuildEvent, BuildRequest, ContainerEngine, ContainerSpec, ContainerState, ExecSpec,
    ExecStreams, OutputChunk,
};
use crate::error::EngineError;

/// Seconds before a request over a well-known socket times out.
const SOCKET_TIMEOUT_SECS: u64 = 120;

/// [`ContainerEngine`] backed by a bollard Docker client.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Where a connected engine was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// bollard's local defaults, which honour `DOCKER_HOST`.
    Default,
    /// A well-known socket on this host.
    Socket(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Default => match std::env::var("DOCKER_HOST") {
                Ok(host) => write!(f, "{host} (DOCKER_HOST)"),
                Err(_) => f.write_str("default local socket"),
            },
            Endpoint::Socket(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Connect to a Docker or Podman daemon.
pub async fn connect_engine() -> Result<DockerEngine, EngineError> {
    locate_engine().await.map(|(engine, _)| engine)
}

/// Connect to a Docker or Podman daemon and report which endpoint answered.
///
/// Tries bollard's local defaults first, then well-known sockets used by
/// rootless Docker, Docker Desktop, OrbStack and Podman. A connection only
/// counts once the daemon answers a ping.
pub async fn locate_engine() -> Result<(DockerEngine, Endpoint), EngineError> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok((DockerEngine::new(docker), Endpoint::Default));
    }

    #[cfg(unix)]
    {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        let home = dirs::home_dir();
        for socket in candidate_sockets(home.as_deref(), runtime_dir.as_deref()) {
            if !socket.exists() {
                continue;
            }
            let path = socket.to_string_lossy();
            let Ok(docker) =
                Docker::connect_with_socket(&path, SOCKET_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            else {
                continue;
            };
            if docker.ping().await.is_ok() {
                tracing::debug!(socket = %path, "Connected to container engine");
                return Ok((DockerEngine::new(docker), Endpoint::Socket(socket)));
            }
        }
    }

    Err(EngineError::Unavailable(
        "could not reach a Docker or Podman daemon".to_string(),
    ))
}

/// Socket paths to try when the default connection fails, in priority order.
fn candidate_sockets(home: Option<&Path>, runtime_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(runtime) = runtime_dir {
        sockets.push(runtime.join("docker.sock"));
        sockets.push(runtime.join("podman").join("podman.sock"));
    }
    if let Some(home) = home {
        sockets.push(home.join(".docker").join("run").join("docker.sock"));
        sockets.push(home.join(".orbstack").join("run").join("docker.sock"));
        sockets.push(
            home.join(".local")
                .join("share")
                .join("containers")
                .join("podman")
                .join("machine")
                .join("podman.sock"),
        );
    }
    sockets.push(PathBuf::from("/var/run/docker.sock"));
    sockets.push(PathBuf::from("/run/podman/podman.sock"));
    sockets
}

fn map_error(operation: &'static str, err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        BollardError::SocketNotFoundError(path) => {
            EngineError::Unavailable(format!("socket not found: {path}"))
        }
        BollardError::IOError { err } => EngineError::Unavailable(err.to_string()),
        other => EngineError::Request {
            operation,
            reason: other.to_string(),
        },
    }
}

fn build_event(info: BuildInfo) -> Option<BuildEvent> {
    if let Some(error) = info.error {
        return Some(BuildEvent::Error(error));
    }
    if let Some(stream) = info.stream {
        return Some(BuildEvent::Output(stream));
    }
    info.status.map(|status| BuildEvent::Output(format!("{status}\n")))
}

fn demux(item: Result<LogOutput, BollardError>) -> Option<Result<OutputChunk, EngineError>> {
    match item {
        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
            Some(Ok(OutputChunk::Stdout(message)))
        }
        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message))),
        Ok(LogOutput::StdIn { .. }) => None,
        Err(e) => Some(Err(map_error("attach_exec", e))),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect(&self, name: &str) -> Result<ContainerState, EngineError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let running = info.state.and_then(|s| s.running).unwrap_or(false);
                Ok(if running {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                })
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(ContainerState::Absent),
            Err(e) => Err(map_error("inspect_container", e)),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error("remove_container", e))
    }

    fn build_image(
        &self,
        request: BuildRequest,
    ) -> BoxStream<'_, Result<BuildEvent, EngineError>> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile,
            t: request.tag,
            rm: true,
            ..Default::default()
        };
        self.docker
            .build_image(options, None, Some(request.context))
            .filter_map(|item| {
                future::ready(match item {
                    Ok(info) => build_event(info).map(Ok),
                    Err(e) => Some(Err(map_error("build_image", e))),
                })
            })
            .boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_error("create_container", e))?;
        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Engine warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error("start_container", e))
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let options = CreateExecOptions {
            cmd: Some(spec.command.clone()),
            working_dir: spec.working_dir.clone(),
            tty: Some(spec.tty),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| map_error("create_exec", e))?;
        Ok(created.id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<ExecStreams, EngineError> {
        let started = self
            .docker
            .start_exec(exec_id, None::<StartExecOptions>)
            .await
            .map_err(|e| map_error("start_exec", e))?;
        match started {
            StartExecResults::Attached { output, input } => Ok(ExecStreams {
                input,
                output: output.filter_map(|item| future::ready(demux(item))).boxed(),
            }),
            StartExecResults::Detached => Err(EngineError::Request {
                operation: "start_exec",
                reason: "exec started detached, no streams to attach".to_string(),
            }),
        }
    }

    async fn resize_exec(
        &self,
        exec_id: &str,
        width: u16,
        height: u16,
    ) -> Result<(), EngineError> {
        self.docker
            .resize_exec(exec_id, ResizeExecOptions { height, width })
            .await
            .map_err(|e| map_error("resize_exec", e))
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, EngineError> {
        self.docker
            .inspect_exec(exec_id)
            .await
            .map(|info| info.exit_code)
            .map_err(|e| map_error("inspect_exec", e))
    }
}
