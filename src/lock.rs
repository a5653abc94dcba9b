//! Named advisory lock backed by an exclusively-created lock file.
//!
//! Holding the lock means owning the file. The guard deletes it on drop,
//! so release happens on every exit path including early returns and
//! unwinding. A holder that died without dropping its guard leaves the
//! file behind; [`FileLock::acquire`] removes such a file once after a
//! full timeout and then tries again.
//!
//! The file holds an owner token (pid plus a random nonce). A guard only
//! deletes the file while it still carries its own token, so a slow holder
//! whose lock was cleaned up as stale cannot release its successor's lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::LockError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Name of the lock serializing folder/tag/region/location/date updates.
pub const METADATA_UPDATE_LOCK: &str = "metadata_update";

#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Lock file path for a named lock inside `lock_dir`.
    pub fn path_for(lock_dir: &Path, name: &str) -> PathBuf {
        lock_dir.join(format!("{}.lock", name))
    }

    /// Acquire the lock at `path`, waiting at most `timeout`.
    ///
    /// On timeout the lock file is treated as stale, removed, and one more
    /// wait of `timeout` is attempted before giving up.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<FileLock, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        if let Some(lock) = Self::wait_for(path, timeout)? {
            return Ok(lock);
        }

        warn!(lock = %path.display(), "lock wait timed out, removing stale lock file");
        Self::force_unlock(path)?;

        match Self::wait_for(path, timeout)? {
            Some(lock) => Ok(lock),
            None => Err(LockError::Timeout {
                path: path.to_path_buf(),
                waited: timeout * 2,
            }),
        }
    }

    /// Remove a lock file regardless of who holds it.
    pub fn force_unlock(path: &Path) -> Result<(), LockError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wait_for(path: &Path, timeout: Duration) -> Result<Option<FileLock>, LockError> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_create(path)? {
                return Ok(Some(lock));
            }
            if started.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(timeout));
        }
    }

    fn try_create(path: &Path) -> Result<Option<FileLock>, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let token = format!("{} {:016x}", std::process::id(), rand::random::<u64>());
                if let Err(source) = writeln!(file, "{}", token).and_then(|()| file.sync_all()) {
                    let _ = fs::remove_file(path);
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                debug!(lock = %path.display(), owner = %token, "lock acquired");
                Ok(Some(FileLock {
                    path: path.to_path_buf(),
                    token,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(owner) if owner.trim() == self.token => {}
            Ok(owner) => {
                debug!(
                    lock = %self.path.display(),
                    owner = owner.trim(),
                    "lock was taken over after a stale cleanup, leaving it"
                );
                return;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(lock = %self.path.display(), "failed to read lock owner: {}", e);
                return;
            }
        }

        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), "failed to release lock: {}", e);
            }
        } else {
            debug!(lock = %self.path.display(), "lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_release_on_drop() {
        let dir = tempdir().unwrap();
        let path = FileLock::path_for(dir.path(), METADATA_UPDATE_LOCK);

        {
            let lock = FileLock::acquire(&path, Duration::from_millis(100)).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!path.exists());

        let _again = FileLock::acquire(&path, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_stale_lock_is_cleaned_up_once() {
        let dir = tempdir().unwrap();
        let path = FileLock::path_for(dir.path(), "stale");
        fs::write(&path, "12345\n").unwrap();

        let lock = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_superseded_guard_keeps_new_owner_lock() {
        let dir = tempdir().unwrap();
        let path = FileLock::path_for(dir.path(), "handover");

        let first = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
        FileLock::force_unlock(&path).unwrap();
        let second = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();

        drop(first);
        assert!(path.exists());
        assert!(FileLock::try_create(&path).unwrap().is_none());

        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn test_serializes_threads() {
        let dir = tempdir().unwrap();
        let path = FileLock::path_for(dir.path(), "counter");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _lock = FileLock::acquire(&path, Duration::from_secs(10)).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
