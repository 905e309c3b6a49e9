//! The local agent configuration: a flat key→string map.
//!
//! Pure parse/render only; reading and atomically rewriting the file on disk
//! is `infra::config`'s job. The file format is one `key = value` per line,
//! `#` comments and blank lines ignored.

use std::collections::BTreeMap;

use rollout_common::DEFAULT_BASE_URL;

// ── Well-known keys ──────────────────────────────────────────────────────────

pub const BASE_URL: &str = "base_url";
pub const CLIENT_CERTIFICATE: &str = "client_certificate";
pub const CLIENT_CERTIFICATE_KEY: &str = "client_certificate_key";
pub const CA_CERTIFICATE: &str = "ca_certificate";

/// Operational settings loaded from the local config file and rewritten at
/// exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    values: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `key = value` text format.
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    /// Render back to the file format, keys in sorted order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// The repository base URL, falling back to the built-in default.
    pub fn base_url(&self) -> &str {
        self.get(BASE_URL).unwrap_or(DEFAULT_BASE_URL)
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
