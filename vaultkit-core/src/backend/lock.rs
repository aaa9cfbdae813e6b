//! Cross-process lock serializing file-service mutations.
//!
//! A file-backed exclusive lock (`flock` on Unix). The guard releases on
//! drop. On non-Unix hosts the lock degrades to a no-op; the file service's
//! atomic rename still keeps individual writes consistent there.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::status::{OsStatus, ServiceError};

/// File-backed exclusive lock serializing mutations across processes.
#[derive(Debug, Clone)]
pub struct StoreLock {
    file: Arc<File>,
}

/// Guard holding the exclusive lock for its lifetime.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: Arc<File>,
}

impl StoreLock {
    /// Opens or creates the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or created.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| map_io_err(&err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| map_io_err(&err))?;
        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Acquires the exclusive lock, blocking until it is free.
    ///
    /// # Errors
    ///
    /// Fails when the lock cannot be acquired.
    pub fn lock(&self) -> Result<StoreLockGuard, ServiceError> {
        lock_exclusive(&self.file).map_err(|err| map_io_err(&err))?;
        Ok(StoreLockGuard {
            file: Arc::clone(&self.file),
        })
    }

    /// Attempts to acquire the exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when another holder has the lock.
    ///
    /// # Errors
    ///
    /// Fails when the attempt fails for a reason other than the lock being
    /// held elsewhere.
    pub fn try_lock(&self) -> Result<Option<StoreLockGuard>, ServiceError> {
        if try_lock_exclusive(&self.file).map_err(|err| map_io_err(&err))? {
            Ok(Some(StoreLockGuard {
                file: Arc::clone(&self.file),
            }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
    }
}

fn map_io_err(err: &std::io::Error) -> ServiceError {
    ServiceError::with_description(OsStatus::IO, format!("store lock: {err}"))
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
    let result = unsafe { flock(fd, LOCK_EX) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
    let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if result == 0 {
        Ok(true)
    } else {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
    let result = unsafe { flock(fd, LOCK_UN) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
use std::os::raw::c_int;

#[cfg(unix)]
const LOCK_EX: c_int = 2;
#[cfg(unix)]
const LOCK_NB: c_int = 4;
#[cfg(unix)]
const LOCK_UN: c_int = 8;

#[cfg(unix)]
extern "C" {
    fn flock(fd: c_int, operation: c_int) -> c_int;
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
