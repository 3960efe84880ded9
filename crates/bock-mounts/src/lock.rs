//! Cross-process cache locks.
//!
//! A lock is an exclusive `flock(2)` on a per-cache-entry lock file. The
//! lock belongs to the open file description, so it is released by
//! [`CacheLock::unlock`] or when the `CacheLock` is dropped.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult};
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;

/// A held exclusive lock on a cache entry.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    file: File,
}

impl CacheLock {
    fn open(path: &Path) -> BockResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(|source| BockError::Lock {
                path: path.display().to_string(),
                source,
            })
    }

    /// Acquire the lock, blocking until no other holder remains.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Lock`] if the lock file cannot be opened or
    /// locked.
    pub fn acquire(path: &Path) -> BockResult<Self> {
        let file = Self::open(path)?;
        tracing::debug!(path = %path.display(), "Waiting for cache lock");
        flock(&file, FlockOperation::LockExclusive).map_err(|e| BockError::Lock {
            path: path.display().to_string(),
            source: e.into(),
        })?;
        tracing::info!(path = %path.display(), "Cache lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Acquire the lock only if it is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::Lock`] on I/O failures other than contention.
    pub fn try_acquire(path: &Path) -> BockResult<Option<Self>> {
        let file = Self::open(path)?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                file,
            })),
            Err(e) if e == Errno::WOULDBLOCK => Ok(None),
            Err(e) => Err(BockError::Lock {
                path: path.display().to_string(),
                source: e.into(),
            }),
        }
    }

    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlock call fails; the file is closed
    /// regardless, which also drops the lock.
    pub fn unlock(self) -> BockResult<()> {
        let result = flock(&self.file, FlockOperation::Unlock);
        tracing::debug!(path = %self.path.display(), "Cache lock released");
        result.map_err(|e| BockError::Lock {
            path: self.path.display().to_string(),
            source: e.into(),
        })
    }
}
