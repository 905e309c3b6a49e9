//! The packages step: install everything listed under `packages` on the
//! host's ancestry.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::engine::{CommandOpts, Engine};
use crate::domain::error::EngineResult;
use crate::domain::schema::Schema;
use crate::domain::value::{flatten_list, Value};
use crate::steps::StepHandler;

pub struct Packages;

#[async_trait]
impl StepHandler for Packages {
    fn name(&self) -> &'static str {
        "packages"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let mut schema = BTreeMap::new();
        schema.insert(
            "packages".to_string(),
            Schema::list(Schema::string()).help("packages to install with apt-get"),
        );
        ctx.validate_config(&schema)?;

        if !ctx.i_should("install") {
            ctx.v("package installation skipped by configuration");
            return Ok(());
        }
        let mut packages: Vec<String> = flatten_list(&ctx.c_host_all("packages"))
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let mut seen = std::collections::BTreeSet::new();
        packages.retain(|p| seen.insert(p.clone()));
        if packages.is_empty() {
            ctx.v("no packages configured");
            return Ok(());
        }

        let mut argv: Vec<&str> = vec!["apt-get", "install", "-q", "-y"];
        argv.extend(packages.iter().map(String::as_str));
        ctx.command(
            &argv,
            CommandOpts {
                intro: Some(format!("installing {} package(s)", packages.len())),
                failure: Some("package installation failed".to_string()),
                timeout: Duration::from_secs(600),
                ..CommandOpts::default()
            },
        )
        .await?;
        Ok(())
    }
}
