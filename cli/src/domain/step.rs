//! Step naming and step documentation.
//!
//! A step is a remote file named `NNN-name`; the numeric prefix is its
//! default queue priority and the suffix is the short name step authors and
//! CLI filters use. Step sources carry a POD-style documentation header
//! (`=head1 NAME` … `=cut`) that `--step_help` renders.

use std::sync::OnceLock;

use regex::Regex;

fn step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)-(.*)$").expect("static regex"))
}

fn head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^=head1\s+(\S.*)$").expect("static regex"))
}

/// A parsed step filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepName {
    full: String,
    priority: Option<i64>,
    short: String,
}

impl StepName {
    /// Parse a filename. Names without a numeric prefix keep the whole name
    /// as the short form and carry no priority.
    pub fn parse(name: &str) -> Self {
        match step_re().captures(name) {
            Some(cap) => Self {
                full: name.to_string(),
                priority: cap[1].parse().ok(),
                short: cap[2].to_string(),
            },
            None => Self {
                full: name.to_string(),
                priority: None,
                short: name.to_string(),
            },
        }
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn short(&self) -> &str {
        &self.short
    }

    pub fn priority(&self) -> Option<i64> {
        self.priority
    }

    /// Whether a CLI filter word selects this step: `pattern` matches the
    /// full name against `^\d*-?<pattern>$`.
    pub fn selected_by(&self, pattern: &str) -> bool {
        let anchored = format!(r"^\d*-?{}$", regex::escape(pattern));
        Regex::new(&anchored).map(|re| re.is_match(&self.full)).unwrap_or(false)
    }
}

/// The documentation header extracted from a step's source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDoc {
    sections: Vec<(String, String)>,
}

impl StepDoc {
    /// Extract `=head1` sections from source bytes. Returns `None` when the
    /// source carries no documentation header.
    pub fn parse(source: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(source);
        let mut sections: Vec<(String, String)> = Vec::new();
        let mut current: Option<(String, Vec<String>)> = None;
        for line in text.lines() {
            if let Some(cap) = head_re().captures(line) {
                if let Some((title, body)) = current.take() {
                    sections.push((title, body.join("\n").trim().to_string()));
                }
                current = Some((cap[1].trim().to_string(), Vec::new()));
            } else if line.trim() == "=cut" {
                if let Some((title, body)) = current.take() {
                    sections.push((title, body.join("\n").trim().to_string()));
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line.to_string());
            }
        }
        if let Some((title, body)) = current.take() {
            sections.push((title, body.join("\n").trim().to_string()));
        }
        if sections.is_empty() {
            None
        } else {
            Some(Self { sections })
        }
    }

    pub fn section(&self, title: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(title))
            .map(|(_, body)| body.as_str())
    }

    /// Render the documentation as indented plain text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (title, body) in &self.sections {
            out.push_str(title);
            out.push('\n');
            for line in body.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
