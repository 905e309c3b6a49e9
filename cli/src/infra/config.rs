//! Loading and atomically rewriting the local agent configuration file.

use std::path::{Path, PathBuf};

use crate::domain::config::AgentConfig;
use crate::domain::error::{EngineError, EngineResult};
use crate::infra::fs::write_atomic;

/// Reads and rewrites the `key = value` config file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// `configfile` may be a name within `configdir` or an absolute path.
    pub fn new(configdir: &Path, configfile: &str) -> Self {
        let file = Path::new(configfile);
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            configdir.join(file)
        };
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file loads as an empty configuration.
    pub fn load(&self) -> EngineResult<AgentConfig> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(AgentConfig::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(AgentConfig::new()),
            Err(err) => Err(EngineError::local(&self.path, err)),
        }
    }

    /// Rewrite the file; partial writes never corrupt it.
    pub fn save(&self, config: &AgentConfig) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::local(parent, e))?;
        }
        write_atomic(&self.path, config.render().as_bytes())
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
