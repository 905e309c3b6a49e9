//! The engine context: every process-wide concern of the agent, bundled
//! into one value threaded through the driver and exposed to steps as their
//! primitive library.
//!
//! Steps never see the fetcher or the command runner directly; they call
//! the primitives (`c`, `i_*`, `command`, `http_file`, `queue_*`,
//! `validate_config`, logging) and the engine applies safe mode, URL
//! resolution, caching and accounting in one place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use rollout_common::{ListingEntry, MODULE_EXT, STEPS_DIR};

use crate::application::ports::{CommandRunner, CommandSpec, Fetcher, UidSpec};
use crate::domain::config::AgentConfig;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::model::ConfigModel;
use crate::domain::queue::{QueuePayload, StepQueue};
use crate::domain::schema::{self, Schema, Violation};
use crate::domain::step::StepName;
use crate::domain::value::Value;
use crate::output::OutputContext;

/// Priority used by `queue_command` and `queue_code` when none is given;
/// late enough to run after every regular step but before `complete`.
pub const DEFERRED_PRIORITY: i64 = 998;

/// Name of the remote module that enables configuration validation.
pub const VALIDATE_MODULE: &str = "validate";

/// Engine behavior steered from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub hostname: String,
    pub configdir: PathBuf,
    pub verbosity: u8,
    pub safe_mode: bool,
    pub validate: bool,
    pub show_step_labels: bool,
    pub skip_steps: Vec<String>,
    pub only_steps: Vec<String>,
    pub force_steps: Vec<String>,
    pub step_help: Vec<String>,
    pub comment: String,
}

impl RunOptions {
    /// Defaults for a host; tests and the CLI build on this.
    pub fn for_host(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            configdir: PathBuf::from(rollout_common::DEFAULT_CONFIG_DIR),
            verbosity: 1,
            safe_mode: false,
            validate: false,
            show_step_labels: true,
            skip_steps: Vec::new(),
            only_steps: Vec::new(),
            force_steps: Vec::new(),
            step_help: Vec::new(),
            comment: String::new(),
        }
    }
}

/// Future type returned by deferred callables.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>>;

/// A deferred callable queued by `queue_code`.
pub type DeferredFn = for<'a> fn(&'a mut Engine) -> StepFuture<'a>;

/// One entry of the step queue: a step filename or a deferred action.
#[derive(Debug)]
pub enum QueueEntry {
    Step(String),
    Command { label: String, argv: Vec<String> },
    Code { label: String, run: DeferredFn },
}

impl QueuePayload for QueueEntry {
    fn key(&self) -> String {
        match self {
            QueueEntry::Step(name) => name.clone(),
            QueueEntry::Command { label, .. } | QueueEntry::Code { label, .. } => label.clone(),
        }
    }
}

/// Recognized fields of the `command` primitive.
#[derive(Debug, Clone)]
pub struct CommandOpts {
    /// Logged before the command runs; suppresses `success`.
    pub intro: Option<String>,
    /// Logged on clean exit with output, unless `intro` was given.
    pub success: Option<String>,
    /// Logged with the exit code or signal on failure.
    pub failure: Option<String>,
    /// Idle-output budget before the child is killed.
    pub timeout: Duration,
    /// Effective UID for the child.
    pub uid: Option<UidSpec>,
    /// Rewrite the argv to run through `sudo -u <user> -H`.
    pub run_as: Option<String>,
}

impl Default for CommandOpts {
    fn default() -> Self {
        Self {
            intro: None,
            success: None,
            failure: None,
            timeout: Duration::from_secs(120),
            uid: None,
            run_as: None,
        }
    }
}

/// A request for the `http_file` primitive.
#[derive(Debug, Clone)]
pub struct HttpFile {
    /// Absolute, or resolved against the configured `base_url`.
    pub url: String,
    /// When set, the body is streamed to this path with atomic replacement;
    /// when unset, the body is returned.
    pub dest: Option<PathBuf>,
}

/// The engine context.
pub struct Engine {
    opts: RunOptions,
    config: AgentConfig,
    model: ConfigModel,
    queue: StepQueue<QueueEntry>,
    index: Vec<ListingEntry>,
    sources: HashMap<String, Vec<u8>>,
    modules: BTreeSet<String>,
    validated: HashMap<String, Vec<BTreeMap<String, Schema>>>,
    current_step: Option<StepName>,
    step_safe_mode: bool,
    fatal: Option<String>,
    errors: usize,
    validation_errors: usize,
    steps_run: Vec<String>,
    started: Instant,
    out: OutputContext,
    fetcher: Box<dyn Fetcher>,
    runner: Box<dyn CommandRunner>,
}

impl Engine {
    pub fn new(
        mut opts: RunOptions,
        config: AgentConfig,
        fetcher: Box<dyn Fetcher>,
        runner: Box<dyn CommandRunner>,
        out: OutputContext,
    ) -> Self {
        if opts.validate {
            opts.safe_mode = true;
            opts.show_step_labels = false;
        }
        Self {
            opts,
            config,
            model: ConfigModel::new(),
            queue: StepQueue::new(),
            index: Vec::new(),
            sources: HashMap::new(),
            modules: BTreeSet::new(),
            validated: HashMap::new(),
            current_step: None,
            step_safe_mode: false,
            fatal: None,
            errors: 0,
            validation_errors: 0,
            steps_run: Vec::new(),
            started: Instant::now(),
            out,
            fetcher,
            runner,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn opts(&self) -> &RunOptions {
        &self.opts
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    pub fn out(&self) -> &OutputContext {
        &self.out
    }

    pub fn model(&self) -> &ConfigModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ConfigModel {
        &mut self.model
    }

    pub fn queue(&self) -> &StepQueue<QueueEntry> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut StepQueue<QueueEntry> {
        &mut self.queue
    }

    pub fn index(&self) -> &[ListingEntry] {
        &self.index
    }

    pub fn hostname(&self) -> &str {
        &self.opts.hostname
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn count_error(&mut self) {
        self.errors += 1;
    }

    pub fn validation_errors(&self) -> usize {
        self.validation_errors
    }

    pub fn steps_run(&self) -> &[String] {
        &self.steps_run
    }

    pub fn note_step_run(&mut self, name: &str) {
        self.steps_run.push(name.to_string());
    }

    pub fn current_step(&self) -> Option<&StepName> {
        self.current_step.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether side-effect primitives are currently suppressed.
    pub fn safe_mode(&self) -> bool {
        self.opts.safe_mode || self.step_safe_mode
    }

    /// Mark the named step as the one now executing.
    pub fn enter_step(&mut self, step: StepName) {
        self.out.begin_step(step.full());
        self.current_step = Some(step);
        self.step_safe_mode = false;
    }

    pub fn leave_step(&mut self) {
        self.out.end_step();
        self.current_step = None;
        self.step_safe_mode = false;
    }

    pub fn take_fatal(&mut self) -> Option<String> {
        self.fatal.take()
    }

    pub fn fatal_pending(&self) -> bool {
        self.fatal.is_some()
    }

    // ── Remote index and module loading ──────────────────────────────────────

    /// Resolve a possibly relative URL against the configured base URL.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url().trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }

    /// Fetch and remember the remote step index.
    pub fn load_index(&mut self) -> EngineResult<()> {
        let url = self.resolve_url(&format!("{STEPS_DIR}/"));
        self.index = self.fetcher.index(&url)?;
        Ok(())
    }

    /// Replace the index directly. Test hook.
    pub fn set_index(&mut self, entries: Vec<ListingEntry>) {
        self.index = entries;
    }

    /// Cached source bytes of a step, fetched on first use.
    ///
    /// # Errors
    ///
    /// [`EngineError::Http`] on fetch failure or an index checksum
    /// mismatch; [`EngineError::Config`] for empty source.
    pub fn step_source(&mut self, filename: &str) -> EngineResult<Vec<u8>> {
        if let Some(cached) = self.sources.get(filename) {
            return Ok(cached.clone());
        }
        let url = self.resolve_url(&format!("{STEPS_DIR}/{filename}"));
        let bytes = self.fetcher.fetch(&url)?;
        if bytes.is_empty() {
            return Err(EngineError::Config("empty module code".to_string()));
        }
        if let Some(entry) = self.index.iter().find(|e| e.filename == filename) {
            if !entry.checksum.is_empty() {
                let digest = hex_encode(&Sha256::digest(&bytes));
                if digest != entry.checksum.to_lowercase() {
                    return Err(EngineError::Http(format!(
                        "checksum mismatch for {filename}: expected {}, got {digest}",
                        entry.checksum
                    )));
                }
            }
        }
        self.sources.insert(filename.to_string(), bytes.clone());
        Ok(bytes)
    }

    /// Load a shared library module from the repository, once.
    ///
    /// Optional modules that fail to load return `false`; mandatory
    /// failures propagate.
    pub fn remote_require(&mut self, module: &str, optional: bool) -> EngineResult<bool> {
        if self.modules.contains(module) {
            return Ok(true);
        }
        let url = self.resolve_url(&format!("{module}.{MODULE_EXT}"));
        match self.fetcher.fetch(&url) {
            Ok(bytes) if bytes.is_empty() => {
                if optional {
                    self.out.w(&format!("optional module {module} is empty; not loaded"));
                    Ok(false)
                } else {
                    Err(EngineError::Config("empty module code".to_string()))
                }
            }
            Ok(_) => {
                self.modules.insert(module.to_string());
                self.out.v(&format!("loaded module {module}"));
                Ok(true)
            }
            Err(err) if optional => {
                self.out.w(&format!("optional module {module} not loaded: {err}"));
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn module_loaded(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    // ── Configuration lookup primitives ──────────────────────────────────────

    pub fn c(&self, path: &str) -> Option<Value> {
        self.model.c(path)
    }

    pub fn c_all(&self, path: &str) -> Vec<Value> {
        self.model.c_all(path)
    }

    /// Path prefixed with this host's device name.
    pub fn host_path(&self, key: &str) -> String {
        format!("{}/{key}", self.opts.hostname)
    }

    pub fn c_host(&self, key: &str) -> Option<Value> {
        self.c(&self.host_path(key))
    }

    pub fn c_host_all(&self, key: &str) -> Vec<Value> {
        self.c_all(&self.host_path(key))
    }

    pub fn i_has(&self, key: &str) -> Option<Value> {
        self.model.i_has(&self.opts.hostname, key)
    }

    pub fn i_isa(&self, class: &str) -> bool {
        self.model.i_isa(&self.opts.hostname, class)
    }

    /// Whether the current step should perform `item` on this host.
    pub fn i_should(&self, item: &str) -> bool {
        match &self.current_step {
            Some(step) => self.model.i_should(&self.opts.hostname, step, item),
            None => true,
        }
    }

    pub fn i_immutable_file(&self, path: &str) -> bool {
        self.model.i_listed(&self.opts.hostname, "immutable_files", path)
    }

    pub fn i_unsafe_file(&self, path: &str) -> bool {
        self.model.i_listed(&self.opts.hostname, "unsafe_files", path)
    }

    pub fn i_unsafe_dir(&self, path: &str) -> bool {
        self.model.i_listed(&self.opts.hostname, "unsafe_dirs", path)
    }

    pub fn i_ip(&self) -> Option<String> {
        self.model.i_ip(&self.opts.hostname)
    }

    // ── Side-effect primitives ───────────────────────────────────────────────

    /// Run a child process, honoring safe mode.
    ///
    /// Returns the conventional wait-status encoding: exit code in the high
    /// byte, terminating signal in the low seven bits.
    pub async fn command(&mut self, argv: &[&str], opts: CommandOpts) -> EngineResult<i32> {
        if argv.is_empty() {
            return Err(EngineError::Config("command requires a program name".to_string()));
        }
        let mut argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
        if let Some(user) = &opts.run_as {
            let mut wrapped = vec![
                "sudo".to_string(),
                "-u".to_string(),
                user.clone(),
                "-H".to_string(),
            ];
            wrapped.append(&mut argv);
            argv = wrapped;
        }
        if let Some(intro) = &opts.intro {
            self.out.l(intro);
        }
        if self.safe_mode() {
            self.out.l(&format!("CMD: {}", argv.join(" ")));
            return Ok(0);
        }
        let spec = CommandSpec {
            argv,
            timeout: opts.timeout,
            uid: opts.uid.clone(),
            new_session: true,
        };
        let out = &self.out;
        let outcome = self
            .runner
            .run(&spec, &mut |line| out.child_line(line))
            .await?;
        if outcome.timed_out {
            self.out.l("[timeout]");
        }
        let code = outcome.exit_code();
        let signal = outcome.signal();
        if signal != 0 {
            if let Some(failure) = &opts.failure {
                self.out.w(&format!("{failure} (killed by signal {signal})"));
            }
        } else if code != 0 {
            if let Some(failure) = &opts.failure {
                self.out.w(&format!("{failure} (exit code {code})"));
            }
        } else if outcome.wrote_output && opts.intro.is_none() {
            if let Some(success) = &opts.success {
                self.out.l(success);
            }
        }
        Ok(outcome.wait_status)
    }

    /// Fetch a file over HTTP. With a destination, the write is atomic and
    /// suppressed in safe mode; without one, the body is returned (reads
    /// are allowed in safe mode).
    pub fn http_file(&mut self, request: HttpFile) -> EngineResult<Option<Vec<u8>>> {
        let url = self.resolve_url(&request.url);
        match request.dest {
            Some(dest) => {
                if self.safe_mode() {
                    self.out.l(&format!("GET: {url} -> {}", dest.display()));
                    return Ok(None);
                }
                self.fetcher.fetch_to_file(&url, &dest)?;
                self.out.v(&format!("fetched {url} -> {}", dest.display()));
                Ok(None)
            }
            None => self.fetcher.fetch(&url).map(Some),
        }
    }

    /// Force the index step matching `short` to run before any remaining
    /// queued step.
    pub fn queue_step(&mut self, short: &str) -> EngineResult<()> {
        let found = self
            .index
            .iter()
            .find(|e| !e.is_dir() && StepName::parse(&e.filename).selected_by(short))
            .ok_or_else(|| {
                EngineError::Config(format!("no step matching {short:?} in the index"))
            })?;
        let name = found.filename.clone();
        self.out.v(&format!("queued step {name} to run next"));
        self.queue.insert(QueueEntry::Step(name), 0);
        Ok(())
    }

    /// Defer a command until late in the run.
    pub fn queue_command(&mut self, argv: &[&str], priority: Option<i64>) {
        let argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
        let label = format!("cmd:{}", argv.join(" "));
        self.queue.insert(
            QueueEntry::Command { label, argv },
            priority.unwrap_or(DEFERRED_PRIORITY),
        );
    }

    /// Defer a callable until late in the run.
    pub fn queue_code(&mut self, label: &str, run: DeferredFn, priority: Option<i64>) {
        self.queue.insert(
            QueueEntry::Code {
                label: label.to_string(),
                run,
            },
            priority.unwrap_or(DEFERRED_PRIORITY),
        );
    }

    /// For steps whose work cannot be previewed meaningfully: fail the
    /// step outright when safe mode is active instead of logging a
    /// stand-in.
    pub fn reject_safe_mode(&self, reason: &str) -> EngineResult<()> {
        if self.safe_mode() {
            Err(EngineError::SafeMode(reason.to_string()))
        } else {
            Ok(())
        }
    }

    /// Mark the current step as destructive: unless it appears in the
    /// `--force` set, the rest of it runs in safe mode.
    pub fn dangerous_step(&mut self) {
        let Some(step) = &self.current_step else {
            return;
        };
        if self.opts.force_steps.iter().any(|f| step.selected_by(f)) {
            self.out.v("dangerous step forced to run");
            return;
        }
        if !self.step_safe_mode {
            self.step_safe_mode = true;
            self.out
                .w("dangerous step: continuing in safe mode (use --force to override)");
        }
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Check the host configuration against the step's schema.
    ///
    /// In `--validate` mode this always returns the
    /// [`EngineError::ValidationComplete`] signal so the driver skips the
    /// rest of the step body. Re-registering an identical schema is a no-op.
    pub fn validate_config(&mut self, schema: &BTreeMap<String, Schema>) -> EngineResult<()> {
        if !self.modules.contains(VALIDATE_MODULE) {
            self.out
                .w("validate module not loaded; skipping configuration validation");
            return self.validation_exit();
        }
        let step_key = self
            .current_step
            .as_ref()
            .map(|s| s.full().to_string())
            .unwrap_or_default();
        let already = self
            .validated
            .get(&step_key)
            .is_some_and(|seen| seen.iter().any(|s| s == schema));
        if already {
            return self.validation_exit();
        }
        self.validated
            .entry(step_key)
            .or_default()
            .push(schema.clone());

        let mut violations: Vec<Violation> = Vec::new();
        for (key, node) in schema {
            let path = self.host_path(key);
            let hits = self.model.c_all(&path);
            if hits.is_empty() {
                if node.is_required() {
                    violations.push(Violation {
                        path,
                        message: "required key is missing".to_string(),
                    });
                }
                continue;
            }
            for hit in &hits {
                schema::check_value(&path, hit, node, &mut violations);
            }
        }
        if violations.is_empty() {
            return self.validation_exit();
        }
        for violation in &violations {
            self.out.w(&violation.to_string());
        }
        self.validation_errors += violations.len();
        if self.opts.validate {
            Err(EngineError::ValidationComplete)
        } else {
            Err(EngineError::Validation(format!(
                "{} configuration problem(s); step not run",
                violations.len()
            )))
        }
    }

    fn validation_exit(&self) -> EngineResult<()> {
        if self.opts.validate {
            Err(EngineError::ValidationComplete)
        } else {
            Ok(())
        }
    }

    // ── Logging primitives ───────────────────────────────────────────────────

    pub fn l(&self, text: &str) {
        self.out.l(text);
    }

    pub fn v(&self, text: &str) {
        self.out.v(text);
    }

    pub fn d(&self, value: &dyn Debug) {
        self.out.d(value);
    }

    pub fn w(&self, text: &str) {
        self.out.w(text);
    }

    /// Log a fatal error and produce the error that aborts the step. The
    /// driver notices the fatal state and preserves only the `complete`
    /// step.
    pub fn fatal(&mut self, message: &str) -> EngineError {
        self.out.fatal(message);
        self.fatal = Some(message.to_string());
        EngineError::Config(message.to_string())
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
