//! Shared types and constants for the rollout agent and the rolloutd
//! repository server: the directory-listing wire format and the well-known
//! paths both sides agree on.

pub mod listing;

pub use listing::{EntryKind, ListingEntry, ListingError};

/// Name of the agent; used to derive well-known paths.
pub const AGENT_NAME: &str = "rollout";

/// Directory on the repository server that holds step files.
pub const STEPS_DIR: &str = "steps";

/// File extension for shared library modules served by the repository.
pub const MODULE_EXT: &str = "mod";

/// Base URL used when the local configuration does not name one.
pub const DEFAULT_BASE_URL: &str = "http://rollout:3333";

/// Default configuration directory on a managed host.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/rollout";

/// Default configuration file name within the configuration directory.
pub const DEFAULT_CONFIG_FILE: &str = "rollout.cfg";

/// Advisory lock path enforcing one agent instance per host.
pub const LOCK_PATH: &str = "/var/run/rollout.lock";
