//! CLI argument parsing with clap derive.
//!
//! One command, flag-steered: the spelling of the long flags
//! (`--safe_mode`, `--skip_step`, …) is part of the operational interface
//! and is kept underscore-style. `-h` selects the hostname, so help hangs
//! off `-?` and `--help`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use rollout_common::{DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE, LOCK_PATH};

use crate::application::driver;
use crate::application::engine::{Engine, RunOptions};
use crate::domain::config as config_keys;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::ConfigStore;
use crate::infra::host::short_hostname;
use crate::infra::http::{TlsMaterial, UreqFetcher};
use crate::infra::lock::LockFile;
use crate::output::OutputContext;

/// Pull-based host configuration agent
#[derive(Parser)]
#[command(
    name = "rollout",
    version,
    disable_help_flag = true,
    about = "Applies a host's declared configuration from a central step repository"
)]
pub struct Cli {
    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Errors only
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Log commands instead of running them
    #[arg(short = 's', long = "safe_mode")]
    pub safe_mode: bool,

    /// Only run validate_config blocks; the exit code is the violation count
    #[arg(long)]
    pub validate: bool,

    /// Override the repository base URL
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Skip steps matching this name (repeatable)
    #[arg(short = 'k', long = "skip_step")]
    pub skip_step: Vec<String>,

    /// Only run steps matching this name (repeatable)
    #[arg(short = 'o', long = "only")]
    pub only: Vec<String>,

    /// Let a dangerous step run (repeatable)
    #[arg(short = 'f', long = "force")]
    pub force: Vec<String>,

    /// Treat this name as the host root device
    #[arg(short = 'h', long)]
    pub hostname: Option<String>,

    /// Directory for local config and TLS material
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    pub configdir: PathBuf,

    /// Config file within configdir, or an absolute path
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub configfile: String,

    /// Suppress per-step header lines
    #[arg(long = "no_step_labels")]
    pub no_step_labels: bool,

    /// Print documentation for matching steps (repeatable)
    #[arg(short = 'H', long = "step_help")]
    pub step_help: Vec<String>,

    /// Disable colored output
    #[arg(long = "no_color", env = "NO_COLOR")]
    pub no_color: bool,

    /// Print help
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Free-form comment recorded in the run log
    #[arg(trailing_var_arg = true)]
    pub comment: Vec<String>,
}

impl Cli {
    /// Execute the agent and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error on initialization failure; step-level errors are
    /// counted into the exit code instead.
    pub async fn run(self) -> Result<i32> {
        let verbosity = if self.quiet { 0 } else { 1 + self.verbose };
        let show_labels = !self.no_step_labels && !self.validate;
        let out = OutputContext::new(self.no_color, verbosity, show_labels);

        let store = ConfigStore::new(&self.configdir, &self.configfile);
        let mut config = store.load().context("reading local configuration")?;
        if let Some(url) = &self.url {
            config.set(config_keys::BASE_URL, url.clone());
        }
        let hostname = match &self.hostname {
            Some(name) => name.clone(),
            None => short_hostname().context("determining hostname")?,
        };

        let Some(_lock) =
            LockFile::acquire(Path::new(LOCK_PATH)).context("acquiring the agent lock")?
        else {
            anyhow::bail!("rollout is already running on this host");
        };

        let tls = TlsMaterial::resolve(&config, &self.configdir, &hostname);
        let fetcher = UreqFetcher::new(&tls).context("preparing the HTTP client")?;

        let opts = RunOptions {
            hostname,
            configdir: self.configdir,
            verbosity,
            safe_mode: self.safe_mode,
            validate: self.validate,
            show_step_labels: show_labels,
            skip_steps: self.skip_step,
            only_steps: self.only,
            force_steps: self.force,
            step_help: self.step_help,
            comment: self.comment.join(" "),
        };
        let mut engine = Engine::new(
            opts,
            config,
            Box::new(fetcher),
            Box::new(TokioCommandRunner),
            out,
        );
        let errors = driver::run(&mut engine)
            .await
            .context("running the step queue")?;
        store
            .save(engine.config())
            .context("rewriting local configuration")?;
        Ok(i32::try_from(errors.min(250)).unwrap_or(250))
    }
}
