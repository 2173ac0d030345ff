//! Cross-platform advisory file locking.
//!
//! Uses the `fs2` crate (flock on Unix, LockFileEx on Windows). Locks are
//! held by a guard and released on drop. Acquisition is time-bounded: a
//! try-lock loop with short sleeps until the deadline, so a wedged writer
//! can never hang a tool call past `lock_timeout`.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Could not acquire lock {0} within {1:?}")]
    Timeout(PathBuf, Duration),

    #[error("Failed to create lock file {0}: {1}")]
    CreateFailed(PathBuf, #[source] io::Error),

    #[error("Failed to acquire lock {0}: {1}")]
    AcquireFailed(PathBuf, #[source] io::Error),
}

/// A guard holding an exclusive advisory lock.
///
/// The lock is released when the guard is dropped (fs2 unlocks on close).
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + timeout;

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!("Acquired lock: {}", path.display());
                    return Ok(Self {
                        _file: file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout(path.to_path_buf(), timeout));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(LockError::AcquireFailed(path.to_path_buf(), e)),
            }
        }
    }

    /// Acquire without waiting; fails immediately when held elsewhere.
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        Self::acquire(path, Duration::ZERO)
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock").field("path", &self.path).finish()
    }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LockError::CreateFailed(path.to_path_buf(), e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| LockError::CreateFailed(path.to_path_buf(), e))
}
