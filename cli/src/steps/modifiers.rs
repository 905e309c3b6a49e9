//! The modifiers step.
//!
//! Lets the host configuration reshape the remainder of the run: any steps
//! named in `rollout/queue_steps` are forced to the front of the queue.

use async_trait::async_trait;

use crate::application::engine::Engine;
use crate::domain::error::EngineResult;
use crate::domain::value::{flatten_list, Value};
use crate::steps::StepHandler;

pub struct Modifiers;

#[async_trait]
impl StepHandler for Modifiers {
    fn name(&self) -> &'static str {
        "modifiers"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let mut wanted: Vec<String> = flatten_list(&ctx.c_host_all("rollout/queue_steps"))
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        wanted.dedup();
        for short in wanted {
            if let Err(err) = ctx.queue_step(&short) {
                ctx.w(&format!("cannot queue step {short:?}: {err}"));
            }
        }
        Ok(())
    }
}
