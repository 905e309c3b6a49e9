//! Built-in steps.
//!
//! Steps are compiled into the binary and selected by the remote index
//! naming them: when the driver pops `NNN-name`, it fetches the remote
//! source (for caching, checksums and `--step_help`) and dispatches to the
//! handler registered under `name`. An index entry with no compiled handler
//! is skipped with a warning.

pub mod complete;
pub mod modifiers;
pub mod motd;
pub mod os_detection;
pub mod packages;
pub mod setup;

use async_trait::async_trait;

use crate::application::engine::Engine;
use crate::domain::error::EngineResult;

/// One unit of host configuration work.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Short name the remote index selects this step by.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()>;
}

/// Every step compiled into the agent.
static REGISTRY: &[&dyn StepHandler] = &[
    &setup::Setup,
    &os_detection::OsDetection,
    &modifiers::Modifiers,
    &complete::Complete,
    &packages::Packages,
    &motd::Motd,
];

/// Look up the handler for a step's short name.
pub fn find(short: &str) -> Option<&'static dyn StepHandler> {
    REGISTRY.iter().find(|step| step.name() == short).copied()
}
