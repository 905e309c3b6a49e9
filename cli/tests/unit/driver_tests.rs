//! Driver tests: queue seeding, ordering, filters, modes, and failure
//! handling against the mocked repository.

#![allow(clippy::expect_used)]

use rollout::application::driver;
use rollout::application::engine::RunOptions;

use crate::mocks::{engine_for, engine_with, MockRepo, RecordingRunner};

const HOST_ONLY_CONFIG: &str = "devices:\n  host1: {}\n";

#[tokio::test]
async fn test_index_seeding_runs_steps_in_priority_order() {
    let mut repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "999-complete", "212-git"])
        .with_config(HOST_ONLY_CONFIG);
    repo.add_dir("subdir");
    let mut engine = engine_for("host1", repo);

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(
        engine.steps_run(),
        &["001-setup", "100-users", "212-git", "999-complete"]
    );
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn test_empty_index_exits_clean() {
    let mut engine = engine_for("host1", MockRepo::new().with_config(HOST_ONLY_CONFIG));
    let errors = driver::run(&mut engine).await.expect("run");
    assert_eq!(errors, 0);
    assert!(engine.steps_run().is_empty());
}

#[tokio::test]
async fn test_reorder_steps_moves_a_step_later() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-a", "200-b", "999-complete"])
        .with_config(
            "devices:\n  host1:\n    rollout:\n      reorder_steps: [\"100-a\", 300]\n",
        );
    let mut engine = engine_for("host1", repo);

    driver::run(&mut engine).await.expect("run");

    assert_eq!(
        engine.steps_run(),
        &["001-setup", "200-b", "100-a", "999-complete"]
    );
}

#[tokio::test]
async fn test_reorder_of_unknown_step_is_a_noop() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-a", "999-complete"])
        .with_config(
            "devices:\n  host1:\n    rollout:\n      reorder_steps: [\"100-gone\", 5]\n",
        );
    let mut engine = engine_for("host1", repo);

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(engine.steps_run(), &["001-setup", "100-a", "999-complete"]);
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn test_copy_steps_runs_a_step_twice() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-a", "999-complete"])
        .with_config(
            "devices:\n  host1:\n    rollout:\n      copy_steps: [\"100-a\", 500]\n",
        );
    let mut engine = engine_for("host1", repo);

    driver::run(&mut engine).await.expect("run");

    assert_eq!(
        engine.steps_run(),
        &["001-setup", "100-a", "100-a", "999-complete"]
    );
}

#[tokio::test]
async fn test_skip_step_filter_drops_matching_steps() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "999-complete"])
        .with_config(HOST_ONLY_CONFIG);
    let mut opts = RunOptions::for_host("host1");
    opts.skip_steps = vec!["users".to_string()];
    let mut engine = engine_with(opts, repo, RecordingRunner::default());

    driver::run(&mut engine).await.expect("run");

    assert_eq!(engine.steps_run(), &["001-setup", "999-complete"]);
}

#[tokio::test]
async fn test_only_filter_keeps_framework_steps() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "212-git", "999-complete"])
        .with_config(HOST_ONLY_CONFIG);
    let mut opts = RunOptions::for_host("host1");
    opts.only_steps = vec!["git".to_string()];
    let mut engine = engine_with(opts, repo, RecordingRunner::default());

    driver::run(&mut engine).await.expect("run");

    assert_eq!(engine.steps_run(), &["001-setup", "212-git", "999-complete"]);
}

#[tokio::test]
async fn test_skip_steps_configuration_drops_a_whole_step() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "999-complete"])
        .with_config("devices:\n  host1:\n    skip_steps: [\"users:*\"]\n");
    let mut engine = engine_for("host1", repo);

    driver::run(&mut engine).await.expect("run");

    assert_eq!(engine.steps_run(), &["001-setup", "999-complete"]);
}

#[tokio::test]
async fn test_modifiers_queue_steps_runs_next() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "003-modifiers", "500-tuning", "999-complete"])
        .with_config(
            "devices:\n  host1:\n    rollout:\n      queue_steps: [\"tuning\"]\n",
        );
    let mut engine = engine_for("host1", repo);

    driver::run(&mut engine).await.expect("run");

    // tuning jumps to priority zero right after modifiers; its seeded entry
    // still runs at its own priority later.
    assert_eq!(
        engine.steps_run(),
        &[
            "001-setup",
            "003-modifiers",
            "500-tuning",
            "500-tuning",
            "999-complete"
        ]
    );
}

#[tokio::test]
async fn test_safe_mode_suppresses_commands_but_logs_them() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-packages", "999-complete"])
        .with_config("devices:\n  host1:\n    packages: [vim, curl]\n")
        .with_validate_module();
    let runner = RecordingRunner::default();
    let mut opts = RunOptions::for_host("host1");
    opts.safe_mode = true;
    let mut engine = engine_with(opts, repo.clone(), runner.clone());

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 0);
    assert!(runner.argvs().is_empty(), "no child process may be spawned");
    assert!(repo.downloads.lock().expect("lock").is_empty());
    assert!(engine.out().logged("CMD: apt-get install"));
}

#[tokio::test]
async fn test_packages_step_installs_configured_packages() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-packages", "999-complete"])
        .with_config("devices:\n  host1:\n    packages: [vim, curl, vim]\n")
        .with_validate_module();
    let runner = RecordingRunner::default();
    let mut engine = engine_with(RunOptions::for_host("host1"), repo, runner.clone());

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 0);
    let argvs = runner.argvs();
    assert_eq!(argvs.len(), 1);
    assert_eq!(
        argvs[0],
        vec!["apt-get", "install", "-q", "-y", "vim", "curl"]
    );
}

#[tokio::test]
async fn test_validate_mode_counts_violations_and_runs_nothing() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-packages", "999-complete"])
        .with_config("devices:\n  host1:\n    packages: forever\n")
        .with_validate_module();
    let runner = RecordingRunner::default();
    let mut opts = RunOptions::for_host("host1");
    opts.validate = true;
    let mut engine = engine_with(opts, repo, runner.clone());

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 1);
    assert_eq!(engine.validation_errors(), 1);
    assert!(runner.argvs().is_empty());
}

#[tokio::test]
async fn test_scalar_packages_value_fails_the_step_in_a_live_run() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-packages", "999-complete"])
        .with_config("devices:\n  host1:\n    packages: forever\n")
        .with_validate_module();
    let runner = RecordingRunner::default();
    let mut engine = engine_with(RunOptions::for_host("host1"), repo, runner.clone());

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 1);
    assert!(runner.argvs().is_empty());
}

#[tokio::test]
async fn test_fatal_in_setup_preserves_only_the_complete_step() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "999-complete"])
        .with_config("devices: {}\n");
    let mut engine = engine_for("host1", repo);

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(engine.steps_run(), &["001-setup", "999-complete"]);
    assert_eq!(errors, 1);
    assert!(engine.out().logged("FATAL ERROR:"));
}

#[tokio::test]
async fn test_unloadable_step_warns_and_continues() {
    let mut repo = MockRepo::new()
        .with_steps(&["001-setup", "999-complete"])
        .with_config(HOST_ONLY_CONFIG);
    // In the index but without a fetchable body.
    repo.add_index_only("100-ghost");
    let mut engine = engine_for("host1", repo);

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 0);
    assert!(engine.out().logged("cannot load step 100-ghost"));
}

#[tokio::test]
async fn test_step_help_renders_documentation_and_runs_nothing() {
    let repo = MockRepo::new()
        .with_steps(&["001-setup", "100-users", "999-complete"])
        .with_config(HOST_ONLY_CONFIG);
    let mut opts = RunOptions::for_host("host1");
    opts.step_help = vec!["users".to_string()];
    let mut engine = engine_with(opts, repo, RecordingRunner::default());

    let errors = driver::run(&mut engine).await.expect("run");

    assert_eq!(errors, 0);
    assert!(engine.steps_run().is_empty());
    assert!(engine.out().logged("100-users - test step"));
}
