//! Engine diagnosis for `gantry status` and failed sessions.
//!
//! [`diagnose_engine`] connects once, through [`locate_engine`]. When nothing
//! answers, a `docker` or `podman` client on `PATH` separates an engine that
//! is stopped from one that was never installed.
//!
//! [`locate_engine`]: crate::engine::locate_engine

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::engine::docker::{DockerEngine, Endpoint, locate_engine};

/// Clients whose presence means an engine is installed, in preference order.
const CLIENTS: [&str; 2] = ["docker", "podman"];

/// Outcome of trying to reach a container engine.
pub enum EngineReport {
    /// A daemon answered; the connection is ready to use.
    Reachable {
        engine: DockerEngine,
        endpoint: Endpoint,
    },
    /// A client is installed but no daemon answered.
    Stopped { client: PathBuf },
    /// No client on `PATH` and no daemon answered.
    Missing,
}

impl EngineReport {
    /// One-line state for status output.
    pub fn summary(&self) -> String {
        match self {
            EngineReport::Reachable { endpoint, .. } => format!("reachable at {endpoint}"),
            EngineReport::Stopped { client } => {
                format!("not answering ({} is installed)", client.display())
            }
            EngineReport::Missing => "not installed".to_string(),
        }
    }

    /// Next step for the user, when there is one.
    pub fn hint(&self) -> Option<String> {
        match self {
            EngineReport::Reachable { .. } => None,
            EngineReport::Stopped { client } => Some(format!(
                "{} is installed but its daemon did not answer. Start the engine, or point \
                 DOCKER_HOST at one that is running.",
                client_name(client)
            )),
            EngineReport::Missing => Some(
                "Gantry needs a Docker API engine. Install Docker or Podman, or point \
                 DOCKER_HOST at a remote engine."
                    .to_string(),
            ),
        }
    }
}

/// Connect to the engine, or work out why that is not possible.
pub async fn diagnose_engine() -> EngineReport {
    match locate_engine().await {
        Ok((engine, endpoint)) => EngineReport::Reachable { engine, endpoint },
        Err(e) => {
            tracing::debug!("Engine unreachable: {}", e);
            match std::env::var_os("PATH").and_then(|path| installed_client(&path)) {
                Some(client) => EngineReport::Stopped { client },
                None => EngineReport::Missing,
            }
        }
    }
}

fn installed_client(path_var: &OsStr) -> Option<PathBuf> {
    CLIENTS
        .iter()
        .find_map(|name| find_on_path(name, path_var))
}

/// First `name` executable in the directories of a `PATH`-style value.
fn find_on_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let file = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    std::env::split_paths(path_var)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}

fn client_name(client: &Path) -> String {
    client
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| client.display().to_string())
}
