//! The complete step.
//!
//! Conventionally the highest-priority step; the driver preserves it even
//! after a fatal error so the run summary and the persisted run log always
//! exist.

use async_trait::async_trait;

use crate::application::engine::Engine;
use crate::domain::error::EngineResult;
use crate::infra::fs::write_atomic;
use crate::steps::StepHandler;

/// Run log file name inside the configuration directory.
const RUN_LOG: &str = "last_run.log";

pub struct Complete;

#[async_trait]
impl StepHandler for Complete {
    fn name(&self) -> &'static str {
        "complete"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let errors = ctx.errors();
        ctx.l(&format!(
            "run complete in {:.1}s with {errors} error(s)",
            ctx.elapsed().as_secs_f64()
        ));
        if !ctx.opts().comment.is_empty() {
            let comment = ctx.opts().comment.clone();
            ctx.l(&format!("comment: {comment}"));
        }

        let log_path = ctx.opts().configdir.join(RUN_LOG);
        if ctx.safe_mode() {
            ctx.v(&format!("not writing {} in safe mode", log_path.display()));
            return Ok(());
        }
        let mut body = ctx.out().run_log().join("\n");
        body.push('\n');
        write_atomic(&log_path, body.as_bytes())?;
        Ok(())
    }
}
