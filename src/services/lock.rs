use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors from lock acquisition.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Update already in progress")]
    Conflict,

    #[error("Failed to acquire update lock: {0}")]
    Io(#[from] std::io::Error),
}

/// Process-wide mutual-exclusion gate for update runs.
///
/// Backed by a non-blocking advisory lock on a well-known file, so at most one
/// run is active even across independent process instances sharing the same
/// data directory. An in-process flag provides the fast path and backs
/// [`is_held`](Self::is_held).
///
/// Stale-lock note: the advisory lock dies with its holder, so a lock file
/// left behind by a crashed process is re-lockable; its pid/timestamp contents
/// are diagnostics only.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: Utf8PathBuf,
    held: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Try to acquire the lock. Never blocks: if the lock is held by this
    /// process or any other, fails immediately with [`LockError::Conflict`].
    ///
    /// On success the holder's pid and a UTC timestamp are written into the
    /// lock file for external diagnosability.
    pub fn acquire(&self) -> Result<RunLockGuard, LockError> {
        // In-process fast path; claims the flag so two tasks cannot race past it.
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LockError::Conflict);
        }

        match self.try_lock_file() {
            Ok(file) => {
                tracing::debug!("Acquired update lock at {}", self.path);
                Ok(RunLockGuard {
                    file: Some(file),
                    path: self.path.clone(),
                    held: Arc::clone(&self.held),
                })
            }
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn try_lock_file(&self) -> Result<File, LockError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path.as_std_path())?;

        match file.try_lock_exclusive() {
            Ok(true) => {}
            Ok(false) => return Err(LockError::Conflict),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(LockError::Conflict);
            }
            Err(e) => return Err(LockError::Io(e)),
        }

        writeln!(file, "{}\n{}", std::process::id(), Utc::now().to_rfc3339())?;
        file.flush()?;
        Ok(file)
    }

    /// Whether this process currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Held lock. Releasing (explicitly or on drop) unlocks and removes the
/// backing file; a failure to unlink is logged, not fatal.
#[derive(Debug)]
pub struct RunLockGuard {
    file: Option<File>,
    path: Utf8PathBuf,
    held: Arc<AtomicBool>,
}

impl RunLockGuard {
    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        if let Err(e) = FileExt::unlock(&file) {
            tracing::error!("Failed to release update lock cleanly: {}", e);
        }
        drop(file);

        if let Err(e) = fs::remove_file(self.path.as_std_path()) {
            tracing::error!("Failed to remove lock file {}: {}", self.path, e);
        }

        self.held.store(false, Ordering::SeqCst);
        tracing::debug!("Released update lock at {}", self.path);
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_in(dir: &TempDir) -> RunLock {
        let path = Utf8PathBuf::try_from(dir.path().join("update.lock")).unwrap();
        RunLock::new(path)
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let mut guard = lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(lock.path().exists());

        guard.release();
        assert!(!lock.is_held());
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_second_acquire_conflicts() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let _guard = lock.acquire().unwrap();
        assert!(matches!(lock.acquire(), Err(LockError::Conflict)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let mut guard = lock.acquire().unwrap();
        guard.release();
        guard.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        {
            let _guard = lock.acquire().unwrap();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn test_lock_file_contains_pid() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let _guard = lock.acquire().unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        let first_line = contents.lines().next().unwrap();
        assert_eq!(first_line, std::process::id().to_string());
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        let mut guard = lock.acquire().unwrap();
        guard.release();

        // Total order over runs: run n+1 may begin once run n released.
        let _guard2 = lock.acquire().unwrap();
        assert!(lock.is_held());
    }
}
