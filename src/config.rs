//! Configuration for gantry.
//!
//! Two sources feed a session:
//!
//! - **`gantry.yml`** in the project root ([`ProjectConfig`]), which names the
//!   Dockerfile used to build the session image and the commands the project
//!   exposes.
//! - **Environment** ([`LauncherConfig`]), which controls the container
//!   identity, the in-container mount path, the keepalive command and where
//!   the session lock lives. A `.env` file is loaded first if present.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// File name of the project configuration.
pub const PROJECT_FILE: &str = "gantry.yml";

/// Name of the single managed container (and of its image tag).
pub const DEFAULT_CONTAINER_NAME: &str = "gantry";

/// Where the project root is bind-mounted inside the container.
pub const DEFAULT_MOUNT_PATH: &str = "/opt";

/// Command that keeps the session container alive between execs.
pub const DEFAULT_KEEPALIVE: &[&str] = &["sleep", "10000000"];

/// Project configuration, read from `gantry.yml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Dockerfile path, relative to the project root.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Commands the project exposes, in declaration order.
    #[serde(default)]
    pub commands: Vec<String>,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

impl ProjectConfig {
    /// Load `gantry.yml` from a project root.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(PROJECT_FILE);
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Parse project configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self, serde_yml::Error> {
        // An empty file is a valid config with every field defaulted.
        if content.trim().is_empty() {
            return Ok(Self {
                dockerfile: default_dockerfile(),
                commands: Vec::new(),
            });
        }
        serde_yml::from_str(content)
    }

    /// Find the nearest directory at or above `start` that contains `gantry.yml`.
    pub fn discover_root(start: &Path) -> Result<PathBuf, ConfigError> {
        start
            .ancestors()
            .find(|dir| dir.join(PROJECT_FILE).is_file())
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::ProjectNotFound {
                start: start.to_path_buf(),
            })
    }
}

/// Launcher settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Session identity: container name and image tag.
    pub container_name: String,
    /// Absolute in-container path the project root is mounted at.
    pub mount_path: String,
    /// Command the container runs so it stays up between execs.
    pub keepalive: Vec<String>,
    /// Directory holding the per-identity lock file.
    pub lock_dir: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            keepalive: DEFAULT_KEEPALIVE.iter().map(|s| s.to_string()).collect(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl LauncherConfig {
    /// Load launcher settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let container_name = optional_env("GANTRY_CONTAINER")?.unwrap_or(defaults.container_name);
        if container_name.contains(char::is_whitespace) || container_name.contains('/') {
            return Err(ConfigError::InvalidValue {
                key: "GANTRY_CONTAINER".to_string(),
                message: format!("'{container_name}' is not a valid container name"),
            });
        }

        let mount_path = optional_env("GANTRY_MOUNT_PATH")?.unwrap_or(defaults.mount_path);
        if !mount_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "GANTRY_MOUNT_PATH".to_string(),
                message: "must be an absolute path inside the container".to_string(),
            });
        }

        let keepalive = match optional_env("GANTRY_KEEPALIVE")? {
            Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
            None => defaults.keepalive,
        };

        let lock_dir = optional_env("GANTRY_LOCK_DIR")?
            .map(PathBuf::from)
            .unwrap_or(defaults.lock_dir);

        Ok(Self {
            container_name,
            mount_path,
            keepalive,
            lock_dir,
        })
    }

    /// Bind specification mounting `project_root` at the configured path.
    pub fn bind_for(&self, project_root: &Path) -> String {
        format!("{}:{}", project_root.display(), self.mount_path)
    }
}

fn default_lock_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("gantry")
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}
