//! Shared mock infrastructure for unit tests.
//!
//! Provides a canned step repository and a recording command runner so each
//! test file doesn't have to re-define the same boilerplate.

#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rollout::application::engine::{Engine, RunOptions};
use rollout::application::ports::{CommandOutcome, CommandRunner, CommandSpec, Fetcher};
use rollout::domain::config::{AgentConfig, BASE_URL};
use rollout::domain::error::{EngineError, EngineResult};
use rollout::output::OutputContext;
use rollout_common::{listing, ListingEntry};

/// Base URL every unit-test engine is configured with.
pub const REPO: &str = "http://repo";

// ── Mock repository ───────────────────────────────────────────────────────────

/// In-memory stand-in for rolloutd: an index plus file bodies, with a
/// record of every fetch.
#[derive(Default, Clone)]
pub struct MockRepo {
    entries: Vec<ListingEntry>,
    files: HashMap<String, Vec<u8>>,
    pub fetched: Arc<Mutex<Vec<String>>>,
    pub downloads: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step to the index with a plain documented source body.
    pub fn add_step(&mut self, filename: &str) {
        let source = format!("=head1 NAME\n\n{filename} - test step\n\n=cut\n");
        self.add_step_with_source(filename, source.as_bytes());
    }

    pub fn add_step_with_source(&mut self, filename: &str, source: &[u8]) {
        self.entries.push(ListingEntry::file(filename));
        self.files
            .insert(format!("steps/{filename}"), source.to_vec());
    }

    /// Add a step whose index entry carries a checksum.
    pub fn add_step_with_checksum(&mut self, filename: &str, source: &[u8], checksum: &str) {
        let mut entry = ListingEntry::file(filename);
        entry.checksum = checksum.to_string();
        self.entries.push(entry);
        self.files
            .insert(format!("steps/{filename}"), source.to_vec());
    }

    pub fn add_dir(&mut self, name: &str) {
        self.entries.push(ListingEntry::directory(name));
    }

    /// List a step in the index without serving its body.
    pub fn add_index_only(&mut self, filename: &str) {
        self.entries.push(ListingEntry::file(filename));
    }

    pub fn add_file(&mut self, path: &str, bytes: &[u8]) {
        self.files.insert(path.to_string(), bytes.to_vec());
    }

    /// Provide the host configuration document.
    #[must_use]
    pub fn with_config(mut self, yaml: &str) -> Self {
        self.add_file("config.yaml", yaml.as_bytes());
        self
    }

    /// Make the remote validation module available.
    #[must_use]
    pub fn with_validate_module(mut self) -> Self {
        self.add_file("validate.mod", b"schema rules\n");
        self
    }

    #[must_use]
    pub fn with_steps(mut self, names: &[&str]) -> Self {
        for name in names {
            self.add_step(name);
        }
        self
    }

    fn key_of(url: &str) -> String {
        url.strip_prefix(&format!("{REPO}/"))
            .unwrap_or(url)
            .to_string()
    }
}

impl Fetcher for MockRepo {
    fn fetch(&self, url: &str) -> EngineResult<Vec<u8>> {
        self.fetched.lock().expect("lock").push(url.to_string());
        self.files
            .get(&Self::key_of(url))
            .cloned()
            .ok_or_else(|| EngineError::Http(format!("GET {url}: status 404")))
    }

    fn fetch_to_file(&self, url: &str, dest: &Path) -> EngineResult<()> {
        let body = self.fetch(url)?;
        self.downloads
            .lock()
            .expect("lock")
            .push((url.to_string(), dest.display().to_string()));
        std::fs::write(dest, body).map_err(|e| EngineError::local(dest, e))
    }

    fn index(&self, url: &str) -> EngineResult<Vec<ListingEntry>> {
        // Round-trip through the native wire format, like production does.
        let html = listing::render_listing(&self.entries);
        let _ = url;
        listing::parse_listing(&html).map_err(|e| EngineError::Config(e.to_string()))
    }
}

// ── Recording command runner ──────────────────────────────────────────────────

/// Records every spec it is asked to run and returns a fixed status.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    pub wait_status: i32,
}

impl RecordingRunner {
    pub fn failing(exit_code: i32) -> Self {
        Self {
            calls: Arc::default(),
            wait_status: exit_code << 8,
        }
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> EngineResult<CommandOutcome> {
        self.calls.lock().expect("lock").push(spec.argv.clone());
        Ok(CommandOutcome {
            wait_status: self.wait_status,
            timed_out: false,
            wrote_output: false,
        })
    }
}

// ── Engine construction ───────────────────────────────────────────────────────

pub fn engine_with(mut opts: RunOptions, repo: MockRepo, runner: RecordingRunner) -> Engine {
    // Keep run-log writes away from /etc/rollout, one directory per engine
    // so parallel tests never share a path.
    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);
    let configdir = std::env::temp_dir().join(format!(
        "rollout-tests-{}-{}",
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::create_dir_all(&configdir);
    opts.configdir = configdir;

    let mut config = AgentConfig::new();
    config.set(BASE_URL, REPO);
    Engine::new(
        opts,
        config,
        Box::new(repo),
        Box::new(runner),
        OutputContext::silent(),
    )
}

pub fn engine_for(host: &str, repo: MockRepo) -> Engine {
    engine_with(RunOptions::for_host(host), repo, RecordingRunner::default())
}
