//! Engine primitive tests: URL resolution, the step loader, safe mode,
//! the command wrapper, and queue manipulation.

#![allow(clippy::expect_used)]

use std::collections::BTreeMap;

use rollout::application::engine::{CommandOpts, Engine, HttpFile, RunOptions};
use rollout::domain::error::EngineError;
use rollout::domain::schema::Schema;
use rollout::domain::step::StepName;

use crate::mocks::{engine_for, engine_with, MockRepo, RecordingRunner};

fn bare_engine() -> Engine {
    engine_for("host1", MockRepo::new())
}

fn loaded_engine(repo: MockRepo) -> Engine {
    let mut engine = engine_for("host1", repo);
    engine.load_index().expect("index");
    engine
}

#[test]
fn test_resolve_url_joins_relative_paths() {
    let engine = bare_engine();
    assert_eq!(engine.resolve_url("steps/"), "http://repo/steps/");
    assert_eq!(engine.resolve_url("/config.yaml"), "http://repo/config.yaml");
    assert_eq!(
        engine.resolve_url("https://other.example/x"),
        "https://other.example/x"
    );
}

#[test]
fn test_step_source_is_fetched_once_and_cached() {
    let mut repo = MockRepo::new();
    repo.add_step("100-users");
    let fetched = repo.fetched.clone();
    let mut engine = loaded_engine(repo);

    let first = engine.step_source("100-users").expect("source");
    let second = engine.step_source("100-users").expect("source");

    assert_eq!(first, second);
    let urls = fetched.lock().expect("lock");
    let step_fetches = urls
        .iter()
        .filter(|u| u.ends_with("steps/100-users"))
        .count();
    assert_eq!(step_fetches, 1);
}

#[test]
fn test_empty_step_source_is_a_config_error() {
    let mut repo = MockRepo::new();
    repo.add_step_with_source("100-empty", b"");
    let mut engine = loaded_engine(repo);

    let err = engine.step_source("100-empty").expect_err("empty source");
    assert!(matches!(err, EngineError::Config(_)));
    assert!(err.to_string().contains("empty module code"));
}

#[test]
fn test_checksum_mismatch_rejects_the_download() {
    let mut repo = MockRepo::new();
    repo.add_step_with_checksum("100-users", b"body\n", "00ff00ff");
    let mut engine = loaded_engine(repo);

    let err = engine.step_source("100-users").expect_err("bad checksum");
    assert!(matches!(err, EngineError::Http(_)));
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn test_matching_checksum_is_accepted() {
    // sha256 of "body\n"
    let digest = "9e2ec912af5dff2a72300863864fc4da04e81999339d9fac5c7590ba8a3f4e11";
    let mut repo = MockRepo::new();
    repo.add_step_with_checksum("100-users", b"body\n", digest);
    let mut engine = loaded_engine(repo);

    assert!(engine.step_source("100-users").is_ok());
}

#[test]
fn test_remote_require_optional_failure_is_soft() {
    let mut engine = bare_engine();
    let loaded = engine.remote_require("validate", true).expect("optional");
    assert!(!loaded);
    assert!(engine.out().logged("not loaded"));
}

#[test]
fn test_remote_require_mandatory_failure_propagates() {
    let mut engine = bare_engine();
    let err = engine.remote_require("identity", false).expect_err("missing");
    assert!(matches!(err, EngineError::Http(_)));
}

#[test]
fn test_queue_step_requires_an_index_entry() {
    let mut repo = MockRepo::new();
    repo.add_step("212-git");
    let mut engine = loaded_engine(repo);

    assert!(engine.queue_step("git").is_ok());
    assert_eq!(engine.queue().len(), 1);
    let err = engine.queue_step("missing").expect_err("unknown step");
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn test_command_in_safe_mode_logs_and_returns_zero() {
    let runner = RecordingRunner::default();
    let mut opts = RunOptions::for_host("host1");
    opts.safe_mode = true;
    let mut engine = engine_with(opts, MockRepo::new(), runner.clone());

    let status = engine
        .command(&["touch", "/tmp/x"], CommandOpts::default())
        .await
        .expect("command");

    assert_eq!(status, 0);
    assert!(runner.argvs().is_empty());
    assert!(engine.out().logged("CMD: touch /tmp/x"));
}

#[tokio::test]
async fn test_run_as_rewrites_argv_through_sudo() {
    let runner = RecordingRunner::default();
    let mut engine = engine_with(
        RunOptions::for_host("host1"),
        MockRepo::new(),
        runner.clone(),
    );

    engine
        .command(
            &["git", "pull"],
            CommandOpts {
                run_as: Some("deploy".to_string()),
                ..CommandOpts::default()
            },
        )
        .await
        .expect("command");

    assert_eq!(
        runner.argvs()[0],
        vec!["sudo", "-u", "deploy", "-H", "git", "pull"]
    );
}

#[tokio::test]
async fn test_command_failure_logs_the_exit_code() {
    let runner = RecordingRunner::failing(2);
    let mut engine = engine_with(
        RunOptions::for_host("host1"),
        MockRepo::new(),
        runner.clone(),
    );

    let status = engine
        .command(
            &["apt-get", "update"],
            CommandOpts {
                failure: Some("update failed".to_string()),
                ..CommandOpts::default()
            },
        )
        .await
        .expect("command");

    assert_eq!(status >> 8, 2);
    assert!(engine.out().logged("update failed (exit code 2)"));
}

#[tokio::test]
async fn test_dangerous_step_forces_safe_mode_unless_forced() {
    let runner = RecordingRunner::default();
    let mut engine = engine_with(
        RunOptions::for_host("host1"),
        MockRepo::new(),
        runner.clone(),
    );
    engine.enter_step(StepName::parse("300-wipe"));
    engine.dangerous_step();
    assert!(engine.safe_mode());
    engine
        .command(&["rm", "-rf", "/scratch"], CommandOpts::default())
        .await
        .expect("command");
    assert!(runner.argvs().is_empty());

    // The latch resets per step and honors --force.
    engine.leave_step();
    let runner = RecordingRunner::default();
    let mut opts = RunOptions::for_host("host1");
    opts.force_steps = vec!["wipe".to_string()];
    let mut engine = engine_with(opts, MockRepo::new(), runner.clone());
    engine.enter_step(StepName::parse("300-wipe"));
    engine.dangerous_step();
    assert!(!engine.safe_mode());
}

#[test]
fn test_http_file_in_safe_mode_fetches_nothing_to_disk() {
    let repo = MockRepo::new();
    let downloads = repo.downloads.clone();
    let mut opts = RunOptions::for_host("host1");
    opts.safe_mode = true;
    let mut engine = engine_with(opts, repo, RecordingRunner::default());

    let result = engine
        .http_file(HttpFile {
            url: "files/motd".to_string(),
            dest: Some(std::env::temp_dir().join("rollout-motd-test")),
        })
        .expect("http_file");

    assert!(result.is_none());
    assert!(downloads.lock().expect("lock").is_empty());
    assert!(engine.out().logged("GET: http://repo/files/motd"));
}

fn refresh_facts(ctx: &mut Engine) -> rollout::application::engine::StepFuture<'_> {
    Box::pin(async move {
        ctx.l("refreshed");
        Ok(())
    })
}

#[test]
fn test_deferred_entries_sort_late_but_before_complete() {
    let mut engine = bare_engine();
    engine.queue_mut().insert(
        rollout::application::engine::QueueEntry::Step("999-complete".to_string()),
        999,
    );
    engine.queue_command(&["ldconfig"], None);
    engine.queue_code("refresh-facts", refresh_facts, None);

    let priorities: Vec<i64> = engine.queue().iter().map(|(p, _)| p).collect();
    assert_eq!(priorities, vec![998, 998, 999]);
}

#[test]
fn test_reject_safe_mode_fails_only_under_safe_mode() {
    let mut opts = RunOptions::for_host("host1");
    opts.safe_mode = true;
    let engine = engine_with(opts, MockRepo::new(), RecordingRunner::default());
    let err = engine
        .reject_safe_mode("partition table rewrite cannot be simulated")
        .expect_err("safe mode");
    assert!(matches!(err, EngineError::SafeMode(_)));

    let engine = bare_engine();
    assert!(engine.reject_safe_mode("anything").is_ok());
}

#[test]
fn test_validate_config_without_module_warns_and_continues() {
    let mut engine = bare_engine();
    engine.enter_step(StepName::parse("100-packages"));
    let mut schema = BTreeMap::new();
    schema.insert("packages".to_string(), Schema::list(Schema::string()));

    engine.validate_config(&schema).expect("no-op validation");

    assert!(engine.out().logged("validate module not loaded"));
    assert_eq!(engine.validation_errors(), 0);
}
