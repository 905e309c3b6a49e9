//! Atomic file writes.
//!
//! Every file the agent writes goes through temp + fsync + rename so
//! readers on the host never observe a torn file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::error::{EngineError, EngineResult};

/// Temp path next to `dest`, disambiguated by pid.
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".{}", std::process::id()));
    PathBuf::from(name)
}

/// Write bytes to `dest` atomically.
///
/// # Errors
///
/// [`EngineError::LocalFile`]; the temp file is removed on failure and
/// `dest` is left untouched.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> EngineResult<()> {
    let tmp = temp_path(dest);
    let written: EngineResult<()> = (|| {
        let mut file = File::create(&tmp).map_err(|e| EngineError::local(&tmp, e))?;
        file.write_all(bytes).map_err(|e| EngineError::local(&tmp, e))?;
        file.sync_all().map_err(|e| EngineError::local(&tmp, e))?;
        Ok(())
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, dest).map_err(|e| EngineError::local(dest, e))
}

// ── Unit tests ───────────────────────────────────────────────────────────────
