//! Single-instance locking.
//!
//! One lock file per application identifier under the user cache
//! directory. Creation uses `create_new`, so the first process wins and
//! every later one gets [`AppError::AlreadyRunning`]. Dropping the lock
//! removes the file.

use crate::AppError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Held single-instance lock. Dropping it releases the lock file.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Path of the lock file backing this lock.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Single instance lock released: {:?}", self.path),
            Err(e) => error!("Failed to remove lock file {:?}: {}", self.path, e),
        }
    }
}

/// Acquire the single-instance lock for `identifier`.
///
/// The lock file lives under the user cache directory, falling back to
/// the data directory and then the system temp directory.
pub fn acquire(identifier: &str) -> Result<InstanceLock, AppError> {
    let lock_dir = dirs::cache_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir);
    acquire_in(&lock_dir, identifier)
}

/// Acquire the lock with an explicit lock directory.
pub fn acquire_in(dir: &Path, identifier: &str) -> Result<InstanceLock, AppError> {
    let path = dir.join(format!("{}.lock", identifier));

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(_) => {
            debug!("Single instance lock acquired: {:?}", path);
            Ok(InstanceLock { path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!("Single instance lock already held by another instance");
            Err(AppError::already_running(format!(
                "lock file {} exists",
                path.display()
            )))
        }
        Err(e) => {
            error!("Failed to create lock file: {}", e);
            Err(AppError::lock_failed(e.to_string()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
