//! Advisory lock serialising container reconciliation per session identity.
//!
//! Held across inspect/remove/build/create/start and released before the
//! interactive exec, so a second invocation waits for the first rebuild and
//! then finds the container already running.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::LifecycleError;

/// An exclusive lock on `<dir>/<identity>.lock`. Released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Lock file path for an identity.
    pub fn path_for(dir: &Path, identity: &str) -> PathBuf {
        dir.join(format!("{identity}.lock"))
    }

    /// Block until the lock is held.
    ///
    /// Runs the blocking wait on the blocking thread pool.
    pub async fn acquire(dir: &Path, identity: &str) -> Result<Self, LifecycleError> {
        let path = Self::path_for(dir, identity);
        let blocking_path = path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<File> {
            let file = open_lock_file(&blocking_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .unwrap_or_else(|join_err| Err(io::Error::other(join_err)))
        .map(|file| {
            tracing::debug!(lock = %path.display(), "Session lock acquired");
            Self {
                file,
                path: path.clone(),
            }
        })
        .map_err(|source| LifecycleError::Lock {
            path: path.clone(),
            source,
        })
    }

    /// Take the lock if nobody else holds it.
    pub fn try_acquire(dir: &Path, identity: &str) -> Result<Option<Self>, LifecycleError> {
        let path = Self::path_for(dir, identity);
        let lock_err = |source| LifecycleError::Lock {
            path: path.clone(),
            source,
        };
        let file = open_lock_file(&path).map_err(lock_err)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.clone(),
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(lock_err(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), "Failed to release session lock: {}", e);
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    // Windows reports ERROR_LOCK_VIOLATION instead of WouldBlock.
    err.kind() == io::ErrorKind::WouldBlock || (cfg!(windows) && err.raw_os_error() == Some(33))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}
