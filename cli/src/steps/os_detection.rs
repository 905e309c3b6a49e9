//! The os-detection step.
//!
//! Reads `/etc/os-release` and links the host device to a class named after
//! the distribution, under a common `Linux` class, so configuration can key
//! on `i_isa("Ubuntu")` and friends. Purely additive; hosts without an
//! os-release file are left alone.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::application::engine::Engine;
use crate::domain::error::EngineResult;
use crate::domain::value::Value;
use crate::steps::StepHandler;

const OS_RELEASE: &str = "/etc/os-release";

pub struct OsDetection;

#[async_trait]
impl StepHandler for OsDetection {
    fn name(&self) -> &'static str {
        "os-detection"
    }

    async fn run(&self, ctx: &mut Engine) -> EngineResult<()> {
        let text = match std::fs::read_to_string(OS_RELEASE) {
            Ok(text) => text,
            Err(err) => {
                ctx.v(&format!("cannot read {OS_RELEASE}: {err}; skipping detection"));
                return Ok(());
            }
        };
        let fields = parse_os_release(&text);
        let id = fields.get("ID").cloned().unwrap_or_else(|| "linux".to_string());
        let Some(class_name) = class_name_for(&id) else {
            ctx.v(&format!("distribution id {id:?} does not map to a class"));
            return Ok(());
        };

        if !ctx.model().contains("Linux") {
            ctx.model_mut().class("Linux", BTreeMap::new())?;
        }
        if !ctx.model().contains(&class_name) {
            let mut block = BTreeMap::new();
            block.insert("ISA".to_string(), Value::Str("Linux".to_string()));
            block.insert("os_id".to_string(), Value::Str(id.clone()));
            if let Some(version) = fields.get("VERSION_ID") {
                block.insert("os_version".to_string(), Value::Str(version.clone()));
            }
            ctx.model_mut().class(&class_name, block)?;
        }
        let host = ctx.hostname().to_string();
        ctx.model_mut().add_parent(&host, &class_name)?;
        ctx.l(&format!("detected {class_name}"));
        Ok(())
    }
}

fn parse_os_release(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            fields.insert(key.trim().to_string(), value);
        }
    }
    fields
}

/// Turn a distribution id into a valid class name, or `None` when the id
/// has no usable characters.
fn class_name_for(id: &str) -> Option<String> {
    let cleaned: String = id
        .chars()
        .skip_while(|c| !c.is_ascii_alphabetic())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.len() < 2 {
        return None;
    }
    let mut chars = cleaned.chars();
    let first = chars.next()?.to_ascii_uppercase();
    Some(format!("{first}{}", chars.as_str()))
}

// ── Unit tests ───────────────────────────────────────────────────────────────
