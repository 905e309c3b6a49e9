//! The motd step: keep `/etc/motd` synchronized with a repository-hosted
//! message of the day.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::application::engine::{Engine, HttpFile};
use crate::domain::error::EngineResult;
use crate::domain::schema::Schema;
use crate::domain::value::Value;
use crate::steps::StepHandler;

const MOTD_PATH: &str = "/etc/motd";

pub struct Motd;

#[async_trait]
impl StepHandler for Motd {
    fn name(&self) -> &'static str {
        "motd"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let mut schema = BTreeMap::new();
        schema.insert(
            "motd".to_string(),
            Schema::options([(
                "url",
                Schema::string().required().help("URL of the message of the day"),
            )]),
        );
        ctx.validate_config(&schema)?;

        let Some(url) = ctx
            .c_host("motd/url")
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            ctx.v("no motd configured");
            return Ok(());
        };
        if ctx.i_immutable_file(MOTD_PATH) {
            ctx.l(&format!("{MOTD_PATH} is immutable; leaving it alone"));
            return Ok(());
        }
        ctx.http_file(HttpFile {
            url,
            dest: Some(PathBuf::from(MOTD_PATH)),
        })?;
        Ok(())
    }
}
