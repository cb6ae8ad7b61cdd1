//! `L_file`: a portable, advisory inter-process lock keyed by a cache file
//! path.
//!
//! Implemented as an atomic `mkdir` primitive rather than `flock`, since
//! directory creation is atomic and portable across POSIX filesystems and
//! NFS, where advisory byte-range locks are not reliable. The guard type is
//! an RAII handle that releases on `Drop`.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// An advisory, process-wide directory lock.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Name the lock directory sibling to `cache_path` (e.g.
    /// `identifier.lock` next to `identifier`).
    pub fn path_for(cache_path: &Path) -> PathBuf {
        let mut name = cache_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        cache_path.with_file_name(name)
    }

    /// Block until the lock is acquired or `timeout` elapses.
    pub fn acquire(path: PathBuf, timeout: Duration) -> Result<DirLockGuard, LockTimeout> {
        let deadline = Instant::now() + timeout;
        loop {
            match try_create(&path) {
                Ok(()) => return Ok(DirLockGuard { path }),
                Err(_) if Instant::now() < deadline => sleep(POLL_INTERVAL),
                Err(_) => return Err(LockTimeout),
            }
        }
    }

    /// A single, non-blocking acquisition attempt. Used by the coordinator's
    /// convoy-avoidance probe: a caller that finds the lock already
    /// contended falls back to waiting for a deferred entry to appear
    /// instead of queuing behind it.
    pub fn try_acquire(path: PathBuf) -> Option<DirLockGuard> {
        try_create(&path).ok().map(|()| DirLockGuard { path })
    }
}

fn try_create(path: &Path) -> io::Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::AlreadyExists, "lock held"))
        }
        Err(e) => Err(e),
    }
}

/// Held while `DirLock::acquire`/`try_acquire` returns successfully; removes
/// the lock directory on drop.
pub struct DirLockGuard {
    path: PathBuf,
}

impl Drop for DirLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            log::warn!("failed to release lock directory {:?}: {}", self.path, e);
        }
    }
}

/// `L_file` was not acquired within the configured `lock_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cache.lock");
        {
            let _guard = DirLock::acquire(lock_path.clone(), Duration::from_millis(100)).unwrap();
            assert!(lock_path.is_dir());
        }
        assert!(!lock_path.exists());
        let _guard2 = DirLock::acquire(lock_path, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cache.lock");
        let _held = DirLock::acquire(lock_path.clone(), Duration::from_millis(100)).unwrap();
        let result = DirLock::acquire(lock_path, Duration::from_millis(30));
        assert_eq!(result.err(), Some(LockTimeout));
    }

    #[test]
    fn try_acquire_is_non_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cache.lock");
        let _held = DirLock::acquire(lock_path.clone(), Duration::from_millis(100)).unwrap();
        assert!(DirLock::try_acquire(lock_path).is_none());
    }
}
