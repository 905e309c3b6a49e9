//! Single-instance enforcement with an advisory file lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::domain::error::{EngineError, EngineResult};

/// Holds an exclusive `flock` on the agent lock file. The lock releases
/// when this value drops (or the process exits).
pub struct LockFile {
    // Held open for the lock's lifetime.
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Try to acquire the lock without blocking; `Ok(None)` when another
    /// instance already holds it.
    pub fn acquire(path: &Path) -> EngineResult<Option<Self>> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| EngineError::local(path, e))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => Ok(None),
                _ => Err(EngineError::local(path, err)),
            };
        }
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
