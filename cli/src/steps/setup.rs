//! The setup step.
//!
//! Fetches the host configuration document from the repository, defines
//! every class, device and network in the model, and loads the optional
//! remote validation module. Every later step depends on the model this
//! step builds, so failures here are fatal.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::application::engine::{Engine, HttpFile, VALIDATE_MODULE};
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::value::Value;
use crate::steps::StepHandler;

/// Remote path of the host configuration document.
pub const CONFIG_DOCUMENT: &str = "config.yaml";

pub struct Setup;

#[async_trait]
impl StepHandler for Setup {
    fn name(&self) -> &'static str {
        "setup"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let body = match ctx.http_file(HttpFile {
            url: CONFIG_DOCUMENT.to_string(),
            dest: None,
        }) {
            Ok(Some(body)) => body,
            Ok(None) => Vec::new(),
            Err(err) => {
                return Err(ctx.fatal(&format!("cannot fetch host configuration: {err}")));
            }
        };
        let doc: serde_yaml::Value = serde_yaml::from_slice(&body).map_err(|err| {
            EngineError::Config(format!("cannot parse {CONFIG_DOCUMENT}: {err}"))
        })?;
        define_entities(ctx, doc)?;

        let host = ctx.hostname().to_string();
        if !ctx.model().contains(&host) {
            return Err(ctx.fatal(&format!("no configuration for host {host}")));
        }
        ctx.remote_require(VALIDATE_MODULE, true)?;
        Ok(())
    }
}

/// Walk the `classes:`, `devices:` and `networks:` sections of the
/// document into the model.
fn define_entities(ctx: &mut Engine, doc: serde_yaml::Value) -> EngineResult<()> {
    let root = Value::from(doc);
    let Some(map) = root.as_map() else {
        return Err(EngineError::Config(
            "host configuration document must be a mapping".to_string(),
        ));
    };
    if let Some(classes) = map.get("classes").and_then(Value::as_map) {
        for (name, block) in classes {
            ctx.model_mut().class(name, block_of(block))?;
        }
    }
    if let Some(devices) = map.get("devices").and_then(Value::as_map) {
        for (name, block) in devices {
            ctx.model_mut().device(name, block_of(block))?;
        }
    }
    if let Some(networks) = map.get("networks").and_then(Value::as_map) {
        for (name, members) in networks {
            let members: Vec<String> = members
                .as_list()
                .unwrap_or(&[])
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            ctx.model_mut().network(name, members);
        }
    }
    Ok(())
}

fn block_of(value: &Value) -> BTreeMap<String, Value> {
    value.as_map().cloned().unwrap_or_default()
}
