//! Terminal output for the agent.
//!
//! All engine logging funnels through [`OutputContext`]: leveled lines,
//! lazily printed step labels, and an in-memory run log that the `complete`
//! step persists at the end of a run.

pub mod styles;

use std::fmt::Debug;
use std::sync::Mutex;

use console::Term;
use owo_colors::OwoColorize;

pub use styles::Styles;

/// Verbosity at which plain `l()` lines appear.
pub const NORMAL: u8 = 1;
/// Verbosity at which `v()` lines appear.
pub const VERBOSE: u8 = 2;
/// Verbosity at which `d()` dumps appear.
pub const DEBUG: u8 = 3;

#[derive(Default)]
struct Inner {
    pending_label: Option<String>,
    run_log: Vec<String>,
}

/// Output context carrying styling, verbosity, and the run log.
pub struct OutputContext {
    styles: Styles,
    verbosity: u8,
    show_step_labels: bool,
    inner: Mutex<Inner>,
}

impl OutputContext {
    /// Create an output context from CLI flags and the environment.
    #[must_use]
    pub fn new(no_color: bool, verbosity: u8, show_step_labels: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            verbosity,
            show_step_labels,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A context that prints nothing; used by tests.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(true, 0, false)
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Arm the lazily printed label for the step about to run.
    pub fn begin_step(&self, label: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_label = Some(label.to_string());
        }
    }

    /// Drop an armed label that never printed.
    pub fn end_step(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_label = None;
        }
    }

    /// Record `line` in the run log and, when `printed` is set, put that
    /// rendering on the terminal. The run log always stays plain text.
    fn emit(&self, line: &str, printed: Option<String>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(label) = inner.pending_label.take() {
            inner.run_log.push(label.clone());
            if self.show_step_labels && self.verbosity >= NORMAL {
                println!("{}", label.style(self.styles.header));
            }
        }
        inner.run_log.push(line.to_string());
        if let Some(rendered) = printed {
            println!("{rendered}");
        }
    }

    /// Normal log line, indented two spaces by default.
    pub fn l(&self, text: &str) {
        self.indented(text, 2);
    }

    /// Normal log line with an explicit indent.
    pub fn indented(&self, text: &str, indent: usize) {
        let line = format!("{:indent$}{text}", "");
        let printed = (self.verbosity >= NORMAL).then(|| line.clone());
        self.emit(&line, printed);
    }

    /// Verbose line.
    pub fn v(&self, text: &str) {
        let line = format!("  {text}");
        let printed =
            (self.verbosity >= VERBOSE).then(|| line.style(self.styles.dim).to_string());
        self.emit(&line, printed);
    }

    /// Debug dump of an arbitrary value.
    pub fn d(&self, value: &dyn Debug) {
        let line = format!("  {value:#?}");
        let printed = (self.verbosity >= DEBUG).then(|| line.clone());
        self.emit(&line, printed);
    }

    /// Warning banner.
    pub fn w(&self, text: &str) {
        let line = format!("  WARNING: {text}");
        let printed = (self.verbosity >= NORMAL)
            .then(|| format!("  {} {text}", "WARNING:".style(self.styles.warning)));
        self.emit(&line, printed);
    }

    /// Fatal error banner; always printed.
    pub fn fatal(&self, text: &str) {
        let line = format!("  FATAL ERROR: {text}");
        let printed = format!("  {} {text}", "FATAL ERROR:".style(self.styles.error));
        self.emit(&line, Some(printed));
    }

    /// One line of output from a child process.
    pub fn child_line(&self, text: &str) {
        let line = format!("    {text}");
        let printed = (self.verbosity >= VERBOSE).then(|| line.clone());
        self.emit(&line, printed);
    }

    /// Snapshot of everything logged so far.
    pub fn run_log(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.run_log.clone())
            .unwrap_or_default()
    }

    /// Whether the run log contains a line including `needle`. Test hook.
    pub fn logged(&self, needle: &str) -> bool {
        self.run_log().iter().any(|line| line.contains(needle))
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
