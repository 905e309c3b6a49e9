//! Host identity.

use crate::domain::error::{EngineError, EngineResult};

/// The short hostname: `gethostname` with any domain part stripped.
pub fn short_hostname() -> EngineResult<String> {
    let full = nix::unistd::gethostname()
        .map_err(|e| EngineError::Config(format!("cannot determine hostname: {e}")))?;
    let full = full.to_string_lossy();
    Ok(full.split('.').next().unwrap_or_default().to_string())
}
