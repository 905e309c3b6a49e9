//! Application layer: the port contracts, the engine context with the step
//! primitive library, and the execution driver.

pub mod driver;
pub mod engine;
pub mod ports;

pub use engine::{CommandOpts, Engine, HttpFile, QueueEntry, RunOptions};
