//! Pure domain types for the execution engine.
//!
//! Nothing in this module performs I/O or depends on `crate::infra`,
//! `crate::steps`, or `tokio`.

pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod schema;
pub mod step;
pub mod value;

pub use config::AgentConfig;
pub use error::{EngineError, EngineResult};
pub use model::{ConfigModel, Entity, EntityKind};
pub use queue::{QueuePayload, StepQueue};
pub use schema::{Schema, Violation};
pub use step::{StepDoc, StepName};
pub use value::{flatten_hash, flatten_list, Value};
