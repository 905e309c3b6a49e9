//! Port trait definitions for the application layer.
//!
//! Ports are the contracts infrastructure must fulfill. This file imports
//! only from `crate::domain` and `rollout_common`; tests substitute mock
//! implementations.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rollout_common::ListingEntry;

use crate::domain::error::EngineResult;

// ── HTTP port ─────────────────────────────────────────────────────────────────

/// Fetches files and directory indexes from the step repository.
pub trait Fetcher: Send + Sync {
    /// GET a URL and return the body.
    ///
    /// # Errors
    ///
    /// [`crate::domain::EngineError::Http`] on transport failure or a
    /// non-2xx status.
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>>;

    /// GET a URL, streaming the body to `<dest>.<pid>` and atomically
    /// renaming to `dest` on success. An empty body never replaces a
    /// non-empty destination.
    fn fetch_to_file(&self, url: &str, dest: &Path) -> EngineResult<()>;

    /// GET a directory URL and parse its listing.
    fn index(&self, url: &str) -> EngineResult<Vec<ListingEntry>>;
}

// ── Subprocess port ───────────────────────────────────────────────────────────

/// How to change identity before exec'ing a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSpec {
    Id(u32),
    Name(String),
}

/// Fully resolved description of one child process.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    /// Idle-output budget; the child is killed when no output arrives for
    /// this long.
    pub timeout: Duration,
    pub uid: Option<UidSpec>,
    /// Detach from the controlling terminal with `setsid`.
    pub new_session: bool,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            timeout: Duration::from_secs(120),
            uid: None,
            new_session: true,
        }
    }
}

/// What happened to a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Conventional wait-status encoding: exit code in the high byte,
    /// terminating signal in the low seven bits.
    pub wait_status: i32,
    pub timed_out: bool,
    /// Whether the child produced any output at all.
    pub wrote_output: bool,
}

impl CommandOutcome {
    pub fn exit_code(&self) -> i32 {
        self.wait_status >> 8
    }

    pub fn signal(&self) -> i32 {
        self.wait_status & 0x7f
    }
}

/// Abstracts process execution so infrastructure can be swapped or mocked.
///
/// Implementations stream every output line into `sink` as it arrives.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> EngineResult<CommandOutcome>;
}
