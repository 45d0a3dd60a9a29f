//! Error types for gantry.

use std::io;
use std::path::PathBuf;

/// Top-level error type for a launcher session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Exec error: {0}")]
    Exec(#[from] ExecError),
}

impl Error {
    /// Whether the failure came from the container engine being unreachable.
    ///
    /// The binary uses this to decide when to print install/start hints.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Engine(EngineError::Unavailable(_))
                | Error::Lifecycle(
                    LifecycleError::CreateFailed(EngineError::Unavailable(_))
                        | LifecycleError::StartFailed(EngineError::Unavailable(_))
                )
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Project file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("No gantry.yml found in {start} or any parent directory")]
    ProjectNotFound { start: PathBuf },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Build context archive errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archive root is missing or unreadable.
    #[error("Archive source {path} not found or unreadable: {source}")]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk {path}: {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("IO error while archiving: {0}")]
    Io(#[from] io::Error),
}

impl From<walkdir::Error> for ArchiveError {
    fn from(err: walkdir::Error) -> Self {
        ArchiveError::Walk {
            path: err.path().map(PathBuf::from).unwrap_or_default(),
            reason: err.to_string(),
        }
    }
}

/// Container engine client errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    #[error("No such container or exec: {0}")]
    NotFound(String),

    #[error("Engine request {operation} failed: {reason}")]
    Request {
        operation: &'static str,
        reason: String,
    },
}

/// Errors raised while bringing the session container to `Running`.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to produce build context: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Container create failed: {0}")]
    CreateFailed(#[source] EngineError),

    #[error("Container start failed: {0}")]
    StartFailed(#[source] EngineError),

    #[error("Failed to acquire session lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Interactive exec errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Exec setup failed: {reason}")]
    SetupFailed { reason: String },

    #[error("Terminal mode change failed: {0}")]
    Terminal(#[source] io::Error),
}
