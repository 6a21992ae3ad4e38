//! Cross-process store locking
//!
//! Advisory file lock on a sibling `<file>.lock`. Writers hold the
//! exclusive lock for their whole load-mutate-save cycle, so the
//! serialized order on disk is the order in which exclusive locks
//! were acquired. Acquisition retries with a jittered sleep under a
//! deadline and surfaces `LockUnavailable` on expiry.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

const RETRY_SLEEP_BASE_MS: u64 = 10;
const RETRY_SLEEP_JITTER_MS: u64 = 40;

/// The lock file guarding a store file.
pub fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

/// A held advisory lock. Released on drop.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Acquire the exclusive (writer) lock before `deadline`.
    pub fn exclusive(path: &Path, deadline: Instant) -> Result<Self> {
        Self::acquire(path, deadline, |file| FileExt::try_lock_exclusive(file))
    }

    /// Acquire the shared (reader) lock before `deadline`.
    pub fn shared(path: &Path, deadline: Instant) -> Result<Self> {
        Self::acquire(path, deadline, |file| FileExt::try_lock_shared(file))
    }

    fn acquire(
        path: &Path,
        deadline: Instant,
        try_lock: impl Fn(&File) -> std::io::Result<()>,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let mut attempts = 0u32;
        loop {
            match try_lock(&file) {
                Ok(()) => {
                    if attempts > 0 {
                        debug!(path = %path.display(), attempts, "lock acquired after retries");
                    }
                    return Ok(Self { file });
                }
                Err(_) if Instant::now() < deadline => {
                    attempts += 1;
                    let sleep = RETRY_SLEEP_BASE_MS + fastrand::u64(..RETRY_SLEEP_JITTER_MS);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(Duration::from_millis(sleep).min(remaining));
                }
                Err(_) => {
                    return Err(Error::LockUnavailable(format!(
                        "could not lock '{}' before the deadline",
                        path.display()
                    )));
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/tmp/store.json")),
            PathBuf::from("/tmp/store.json.lock")
        );
    }

    #[test]
    fn test_exclusive_excludes_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");

        let held = StoreLock::exclusive(&path, deadline_in(100)).unwrap();
        let second = StoreLock::exclusive(&path, deadline_in(150));
        assert!(matches!(second, Err(Error::LockUnavailable(_))));

        drop(held);
        StoreLock::exclusive(&path, deadline_in(100)).unwrap();
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");

        let _a = StoreLock::shared(&path, deadline_in(100)).unwrap();
        let _b = StoreLock::shared(&path, deadline_in(100)).unwrap();
    }

    #[test]
    fn test_waiter_succeeds_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.lock");

        let held = StoreLock::exclusive(&path, deadline_in(100)).unwrap();
        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            StoreLock::exclusive(&waiter_path, deadline_in(2000)).map(|_| ())
        });
        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        waiter.join().unwrap().unwrap();
    }
}
