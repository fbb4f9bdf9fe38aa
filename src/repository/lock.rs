// src/repository/lock.rs

//! Exclusive lock on a cache root
//!
//! A synchronization holds `<cache-root>/.reposync.lock` (`flock(LOCK_EX)`)
//! for its whole run so two processes never download into the same
//! repository cache directories at once. The lock is released on drop.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock file name inside the cache root
pub const LOCK_FILE: &str = ".reposync.lock";

pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    fn open(cache_root: &Path) -> Result<(File, PathBuf)> {
        fs::create_dir_all(cache_root).map_err(|e| {
            Error::Filesystem(format!("Cannot create cache root {}: {e}", cache_root.display()))
        })?;
        let path = cache_root.join(LOCK_FILE);
        let file = File::create(&path)
            .map_err(|e| Error::Filesystem(format!("Cannot open {}: {e}", path.display())))?;
        Ok((file, path))
    }

    /// Acquire the lock, blocking until it is available
    pub fn acquire(cache_root: &Path) -> Result<Self> {
        let (file, path) = Self::open(cache_root)?;
        file.lock_exclusive().map_err(|e| {
            Error::Filesystem(format!("Failed to lock {}: {e}", path.display()))
        })?;
        debug!("Acquired cache lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Acquire the lock without blocking; `None` if it is held elsewhere
    pub fn try_acquire(cache_root: &Path) -> Result<Option<Self>> {
        let (file, path) = Self::open(cache_root)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Cache lock {} is held by another process", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Filesystem(format!("Failed to lock {}: {e}", path.display()))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");

        let held = CacheLock::acquire(&root).unwrap();
        assert_eq!(held.path(), root.join(LOCK_FILE));
        assert!(CacheLock::try_acquire(&root).unwrap().is_none());

        drop(held);
        assert!(CacheLock::try_acquire(&root).unwrap().is_some());
    }
}
