//! OS advisory lock on `.lock`, bounded by a timeout (spec §4.1). `fs2` is
//! the byte-range advisory primitive on POSIX and the mandatory-region lock
//! on Windows — the same crate used for on-disk state-file locking in
//! comparable single-binary agent daemons (e.g. `iskng-metagent`'s
//! `fs2::FileExt` claim-file lock).

use crate::error::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A held exclusive lock. Dropping it releases the OS lock and closes the
/// file handle — the `transaction()` caller never unlocks explicitly.
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Acquire an exclusive lock on `path`, retrying with a short backoff until
/// `timeout` elapses. Runs synchronously — callers on the tokio runtime
/// must wrap this in `spawn_blocking`.
pub fn acquire_exclusive(path: &Path, timeout: Duration) -> Result<LockGuard, CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;

    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => return Err(CoreError::LockTimeout(timeout)),
        }
    }
}

/// Convenience for building the default `.lock` path under a state directory.
pub fn lock_path_under(state_dir: &Path) -> PathBuf {
    state_dir.join(".lock")
}
