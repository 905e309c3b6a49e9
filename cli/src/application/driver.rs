//! The execution driver.
//!
//! Walks the per-process state machine: load the remote index, seed the
//! queue from numeric prefixes, run the setup step, apply the host's
//! reorder/copy directives, then drain the queue in priority order while
//! mapping each error kind to its outcome. Locking and the final config
//! rewrite happen in `cli`, which keeps this module runnable against mock
//! ports.

use crate::application::engine::{CommandOpts, Engine, QueueEntry};
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::step::{StepDoc, StepName};
use crate::domain::value::flatten_list;
use crate::steps;

/// Steps that must run even under `--only`.
const ALWAYS_RUN: &[&str] = &["setup", "os-detection", "modifiers", "complete"];

/// Run the agent against the loaded configuration and return the error
/// count that becomes the process exit code.
pub async fn run(engine: &mut Engine) -> EngineResult<usize> {
    engine.load_index()?;

    if !engine.opts().step_help.is_empty() {
        render_step_help(engine);
        return Ok(0);
    }

    seed(engine);

    // The first queued step is conventionally setup; it defines the
    // configuration model everything later relies on.
    let Some(first) = engine.queue_mut().pop() else {
        return Ok(exit_count(engine));
    };
    run_entry(engine, first).await;
    if engine.take_fatal().is_some() {
        keep_only_complete(engine);
    } else {
        apply_reorder(engine);
    }

    while let Some(entry) = engine.queue_mut().pop() {
        run_entry(engine, entry).await;
        if engine.take_fatal().is_some() {
            keep_only_complete(engine);
        }
    }

    Ok(exit_count(engine))
}

fn exit_count(engine: &Engine) -> usize {
    if engine.opts().validate {
        engine.validation_errors()
    } else {
        engine.errors()
    }
}

/// Queue every index entry with a numeric prefix at that priority.
fn seed(engine: &mut Engine) {
    let seeds: Vec<(String, i64)> = engine
        .index()
        .iter()
        .filter(|entry| !entry.is_dir())
        .filter_map(|entry| {
            StepName::parse(&entry.filename)
                .priority()
                .map(|priority| (entry.filename.clone(), priority))
        })
        .collect();
    for (name, priority) in seeds {
        engine.queue_mut().insert(QueueEntry::Step(name), priority);
    }
}

/// Apply `rollout/reorder_steps` and `rollout/copy_steps` from the host
/// configuration: flat lists read in pairs of (step, priority).
fn apply_reorder(engine: &mut Engine) {
    let reorder = pair_list(engine, "rollout/reorder_steps");
    for (step, priority) in reorder {
        engine.queue_mut().update(&step, priority);
    }
    let copies = pair_list(engine, "rollout/copy_steps");
    for (step, priority) in copies {
        if engine.index().iter().any(|e| e.filename == step) {
            engine.queue_mut().insert(QueueEntry::Step(step), priority);
        } else {
            engine.out().w(&format!("copy_steps names unknown step {step:?}"));
        }
    }
}

fn pair_list(engine: &Engine, key: &str) -> Vec<(String, i64)> {
    let items = flatten_list(&engine.c_host_all(key));
    items
        .chunks(2)
        .filter_map(|pair| match pair {
            [step, priority] => Some((
                step.as_str()?.to_string(),
                priority.as_int()?,
            )),
            _ => None,
        })
        .collect()
}

async fn run_entry(engine: &mut Engine, entry: QueueEntry) {
    match entry {
        QueueEntry::Step(name) => run_step(engine, &name).await,
        QueueEntry::Command { argv, .. } => {
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            if let Err(err) = engine.command(&argv, CommandOpts::default()).await {
                report(engine, err);
            }
        }
        QueueEntry::Code { run, .. } => {
            if let Err(err) = run(engine).await {
                report(engine, err);
            }
        }
    }
}

/// Whether CLI filters leave this step in the run.
fn selected(engine: &Engine, step: &StepName) -> bool {
    if engine
        .opts()
        .skip_steps
        .iter()
        .any(|pattern| step.selected_by(pattern))
    {
        return false;
    }
    let only = &engine.opts().only_steps;
    if !only.is_empty() {
        let wanted = only.iter().any(|pattern| step.selected_by(pattern))
            || ALWAYS_RUN.contains(&step.short());
        if !wanted {
            return false;
        }
    }
    true
}

async fn run_step(engine: &mut Engine, name: &str) {
    let step = StepName::parse(name);
    if !selected(engine, &step) {
        engine.out().v(&format!("skipping {name}"));
        return;
    }
    engine.enter_step(step.clone());
    if !engine.i_should("*") {
        engine.out().l("skipped by configuration");
        engine.leave_step();
        return;
    }
    match execute(engine, &step).await {
        Ok(()) => {}
        Err(err) if err.is_signal() => {}
        Err(err) => report(engine, err),
    }
    engine.note_step_run(name);
    engine.leave_step();
}

async fn execute(engine: &mut Engine, step: &StepName) -> EngineResult<()> {
    match engine.step_source(step.full()) {
        Ok(_) => {}
        Err(err @ EngineError::Http(_)) => {
            // A step that cannot be loaded is a warning, not an error.
            engine.out().w(&format!("cannot load step {}: {err}", step.full()));
            return Ok(());
        }
        Err(err) => return Err(err),
    }
    let Some(handler) = steps::find(step.short()) else {
        engine
            .out()
            .w(&format!("no handler compiled for step {}; skipping", step.full()));
        return Ok(());
    };
    handler.run(engine).await
}

fn report(engine: &mut Engine, err: EngineError) {
    match &err {
        EngineError::ValidationComplete | EngineError::StepHelp => return,
        // fatal() already printed its banner.
        EngineError::Config(_) if engine.fatal_pending() => {}
        EngineError::Http(message)
        | EngineError::Config(message)
        | EngineError::Validation(message)
        | EngineError::SafeMode(message) => engine.out().w(message),
        EngineError::LocalFile { .. } => engine.out().w(&err.to_string()),
    }
    engine.count_error();
}

/// After a fatal error, only the final `complete` step survives, forced to
/// the front of the queue so reporting hooks still run.
fn keep_only_complete(engine: &mut Engine) {
    let complete = engine.queue().iter().find_map(|(_, entry)| match entry {
        QueueEntry::Step(name) if StepName::parse(name).short() == "complete" => {
            Some(name.clone())
        }
        _ => None,
    });
    engine.queue_mut().clear();
    if let Some(name) = complete {
        engine.queue_mut().insert(QueueEntry::Step(name), 0);
    }
}

fn render_step_help(engine: &mut Engine) {
    let patterns = engine.opts().step_help.clone();
    let names: Vec<String> = engine
        .index()
        .iter()
        .filter(|entry| !entry.is_dir())
        .map(|entry| entry.filename.clone())
        .collect();
    for name in names {
        let step = StepName::parse(&name);
        if !patterns.iter().any(|pattern| step.selected_by(pattern)) {
            continue;
        }
        engine.out().indented(&name, 0);
        match engine.step_source(&name) {
            Ok(source) => match StepDoc::parse(&source) {
                Some(doc) => {
                    for line in doc.render().lines() {
                        engine.out().indented(line, 2);
                    }
                }
                None => engine.out().l("(no documentation)"),
            },
            Err(err) => engine.out().w(&format!("cannot load step {name}: {err}")),
        }
    }
}
