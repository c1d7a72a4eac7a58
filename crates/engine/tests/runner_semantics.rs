mod support;

use std::{sync::Arc, time::Duration};

use serde_json::json;
use stepflow_engine::{
    CommandTree, ContextBuilder, ControlFlow, Location, PrepareError, Program, RingBufferLogger, RunEvent, RunOptions, Runner,
    SIGNALLED_ERROR, Settings,
    commands::{
        control::{BREAK_KIND, CONTINUE_KIND, FAIL_KIND, IF_KIND, STOP_KIND, WHILE_KIND},
        input::{CLICK_KIND, MouseButton, PointerDevice},
        log::MESSAGE_KIND,
        time::{WAIT_KIND, WAIT_UNTIL_KIND},
        vars::SET_KIND,
    },
    migrate_tree,
};
use support::*;
use tokio::sync::mpsc::unbounded_channel;

async fn run(tree: &CommandTree, log: &Arc<ExecutionLog>) -> (stepflow_engine::RunOutcome, Vec<RunEvent>) {
    run_with(tree, log, RunOptions::default()).await
}

async fn run_with(tree: &CommandTree, log: &Arc<ExecutionLog>, options: RunOptions) -> (stepflow_engine::RunOutcome, Vec<RunEvent>) {
    let registry = registry();
    let program = Program::prepare(tree, &registry, &services(log)).expect("prepare");
    let (event_tx, mut event_rx) = unbounded_channel();
    let mut context = ContextBuilder::new().build();
    let outcome = Runner::new().with_events(event_tx).with_options(options).run(&program, &mut context).await;
    (outcome, drain(&mut event_rx))
}

async fn run_with_variables(
    tree: &CommandTree,
    log: &Arc<ExecutionLog>,
    variables: serde_json::Value,
) -> (stepflow_engine::RunOutcome, Vec<RunEvent>, stepflow_engine::ExecutionContext) {
    let registry = registry();
    let program = Program::prepare(tree, &registry, &services(log)).expect("prepare");
    let (event_tx, mut event_rx) = unbounded_channel();
    let variables = serde_json::from_value(variables).expect("variables");
    let mut context = ContextBuilder::new().with_variables(variables).build();
    let outcome = Runner::new().with_events(event_tx).run(&program, &mut context).await;
    (outcome, drain(&mut event_rx), context)
}

fn add_signal(tree: &mut CommandTree, location: &Location, kind: &str) -> stepflow_engine::CommandId {
    add_builtin(tree, &registry(), location, kind, json!({}))
}

#[tokio::test]
async fn break_at_root_ends_the_run_with_break() {
    let log = Arc::new(ExecutionLog::default());
    let mut tree = CommandTree::new();
    for (label, flow) in [
        ("a", ControlFlow::Next),
        ("b", ControlFlow::Next),
        ("c", ControlFlow::Break),
        ("d", ControlFlow::Next),
        ("e", ControlFlow::Next),
    ] {
        add_scripted(&mut tree, &Location::Root, label, flow);
    }

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["a", "b", "c"]);
    assert_eq!(outcome.flow, ControlFlow::Break);
    assert!(outcome.failure.is_none());
    assert_eq!(started_ids(&events).len(), 3);
}

#[tokio::test]
async fn disabled_commands_are_skipped_without_events() {
    let log = Arc::new(ExecutionLog::default());
    let mut tree = CommandTree::new();
    add_scripted(&mut tree, &Location::Root, "a", ControlFlow::Next);
    let skipped = add_scripted(&mut tree, &Location::Root, "b", ControlFlow::Stop);
    add_scripted(&mut tree, &Location::Root, "c", ControlFlow::Next);
    tree.set_enabled(skipped, false).expect("disable");

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["a", "c"]);
    assert_eq!(outcome.flow, ControlFlow::Next);
    assert!(!started_ids(&events).contains(&skipped));
    assert!(!events.iter().any(|event| matches!(event, RunEvent::CommandFinished { id, .. } if *id == skipped)));
}

#[tokio::test]
async fn disabled_composite_skips_its_children() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let conditional = add_builtin(&mut tree, &registry, &Location::Root, IF_KIND, json!({ "condition": "true" }));
    add_scripted(&mut tree, &Location::block(conditional, "then"), "inner", ControlFlow::Next);
    tree.set_enabled(conditional, false).expect("disable");

    let (outcome, events) = run(&tree, &log).await;

    assert!(log.entries().is_empty());
    assert!(outcome.succeeded());
    assert!(started_ids(&events).is_empty());
}

#[tokio::test]
async fn false_condition_runs_the_else_block() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let conditional = add_builtin(&mut tree, &registry, &Location::Root, IF_KIND, json!({ "condition": "false" }));
    add_scripted(&mut tree, &Location::block(conditional, "then"), "then", ControlFlow::Next);
    add_scripted(&mut tree, &Location::block(conditional, "else"), "else", ControlFlow::Next);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["else", "after"]);
    assert_eq!(outcome.flow, ControlFlow::Next);
}

#[tokio::test]
async fn empty_branch_yields_next() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let conditional = add_builtin(&mut tree, &registry, &Location::Root, IF_KIND, json!({ "condition": "true" }));
    add_scripted(&mut tree, &Location::block(conditional, "else"), "else", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert!(log.entries().is_empty());
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn conditional_passes_loop_signals_through() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let conditional = add_builtin(&mut tree, &registry, &Location::Root, IF_KIND, json!({ "condition": "true" }));
    add_scripted(&mut tree, &Location::block(conditional, "then"), "then", ControlFlow::Continue);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["then"]);
    assert_eq!(outcome.flow, ControlFlow::Continue);
}

#[tokio::test]
async fn loop_stops_with_an_error_at_its_iteration_limit() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 3 }));
    add_scripted(&mut tree, &Location::block(looping, "body"), "tick", ControlFlow::Next);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["tick", "tick", "tick"]);
    assert_eq!(outcome.flow, ControlFlow::Error);
    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.id, looping);
    assert!(failure.message.contains("iteration limit of 3"), "{}", failure.message);
}

#[tokio::test]
async fn break_on_first_iteration_leaves_the_loop_only() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    add_scripted(&mut tree, &Location::block(looping, "body"), "first", ControlFlow::Break);
    add_scripted(&mut tree, &Location::block(looping, "body"), "unreached", ControlFlow::Next);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["first", "after"]);
    assert_eq!(outcome.flow, ControlFlow::Next);
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn continue_skips_the_rest_of_the_body() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 2 }));
    add_scripted(&mut tree, &Location::block(looping, "body"), "head", ControlFlow::Continue);
    add_scripted(&mut tree, &Location::block(looping, "body"), "tail", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["head", "head"]);
    assert_eq!(outcome.flow, ControlFlow::Error);
}

#[tokio::test]
async fn stop_inside_a_loop_halts_the_run() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    add_scripted(&mut tree, &Location::block(looping, "body"), "halt", ControlFlow::Stop);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["halt"]);
    assert_eq!(outcome.flow, ControlFlow::Stop);
    assert!(!outcome.cancelled);
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn nested_failure_is_recorded_once_and_propagates() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    let failing = add_failing(&mut tree, &Location::block(looping, "body"), "boom", "device unplugged");
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["boom"]);
    assert_eq!(outcome.flow, ControlFlow::Error);
    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.id, failing);
    assert_eq!(failure.message, "device unplugged");

    let finished: Vec<(ControlFlow, Option<String>)> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::CommandFinished { flow, message, .. } => Some((*flow, message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished,
        vec![(ControlFlow::Error, Some("device unplugged".to_string())), (ControlFlow::Error, None)]
    );
}

#[tokio::test]
async fn cancellation_between_commands_stops_the_run() {
    let log = Arc::new(ExecutionLog::default());
    let mut tree = CommandTree::new();
    add_cancelling(&mut tree, &Location::Root, "a");
    for label in ["b", "c", "d"] {
        add_scripted(&mut tree, &Location::Root, label, ControlFlow::Next);
    }

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["a"]);
    assert!(outcome.cancelled);
    assert_eq!(outcome.flow, ControlFlow::Stop);
    assert!(!outcome.succeeded());
    assert_eq!(started_ids(&events).len(), 1);
}

#[tokio::test]
async fn events_arrive_in_program_order() {
    let log = Arc::new(ExecutionLog::default());
    let mut tree = CommandTree::new();
    let first = add_scripted(&mut tree, &Location::Root, "a", ControlFlow::Next);
    let second = add_scripted(&mut tree, &Location::Root, "b", ControlFlow::Next);

    let (_, events) = run(&tree, &log).await;

    let shape: Vec<String> = events
        .iter()
        .map(|event| match event {
            RunEvent::RunStarted { .. } => "run_started".to_string(),
            RunEvent::CommandStarting { id, .. } => format!("starting {id}"),
            RunEvent::CommandFinished { id, flow, .. } => format!("finished {id} {flow}"),
            RunEvent::RunCompleted { outcome, .. } => format!("completed {}", outcome.flow),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        shape,
        vec![
            "run_started".to_string(),
            format!("starting {first}"),
            format!("finished {first} next"),
            format!("starting {second}"),
            format!("finished {second} next"),
            "completed next".to_string(),
        ]
    );
}

#[tokio::test]
async fn dry_run_uses_simulation_when_offered() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    add_scripted(&mut tree, &Location::Root, "a", ControlFlow::Stop);
    add_builtin(&mut tree, &registry, &Location::Root, SET_KIND, json!({ "name": "x", "value": { "source": "literal", "value": "1" } }));

    let (outcome, _) = run_with(&tree, &log, RunOptions { dry_run: true }).await;

    assert_eq!(log.entries(), vec!["dry:a"]);
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn variables_flow_between_commands() {
    let registry = registry();
    let mut tree = CommandTree::new();
    add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        SET_KIND,
        json!({ "name": "who", "value": { "source": "template", "value": "${{ vars.first }} Lovelace" } }),
    );
    add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        MESSAGE_KIND,
        json!({ "message": { "source": "template", "value": "hello ${{ vars.who }}" }, "level": "warn" }),
    );

    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare");
    let logger = Arc::new(RingBufferLogger::new(10));
    let mut context = ContextBuilder::new()
        .with_variables([("first".to_string(), json!("Ada"))].into_iter().collect())
        .with_logger(logger.clone())
        .build();
    let outcome = Runner::new().run(&program, &mut context).await;

    assert!(outcome.succeeded());
    assert_eq!(context.scope().try_get("who"), Some(&json!("Ada Lovelace")));
    let entries = logger.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "hello Ada Lovelace");
    assert_eq!(entries[0].level, stepflow_engine::LogLevel::Warn);
}

#[tokio::test]
async fn unknown_variable_fails_the_command() {
    let registry = registry();
    let mut tree = CommandTree::new();
    let message = add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        MESSAGE_KIND,
        json!({ "message": { "source": "variable", "value": "nowhere" } }),
    );

    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare");
    let mut context = ContextBuilder::new().build();
    let outcome = Runner::new().run(&program, &mut context).await;

    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.id, message);
    assert!(failure.message.contains("nowhere"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_wait_ends_the_run_promptly() {
    let registry = registry();
    let mut tree = CommandTree::new();
    add_builtin(&mut tree, &registry, &Location::Root, WAIT_KIND, json!({ "duration": { "source": "literal", "value": "1h" } }));
    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare");

    let mut context = ContextBuilder::new().build();
    let token = context.cancellation().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let started = tokio::time::Instant::now();
    let outcome = Runner::new().run(&program, &mut context).await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.flow, ControlFlow::Stop);
    assert!(outcome.failure.is_none());
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn wait_until_times_out_with_an_error() {
    let registry = registry();
    let mut tree = CommandTree::new();
    add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        WAIT_UNTIL_KIND,
        json!({ "condition": "vars.ready", "timeout": "1s", "poll_interval": "100ms" }),
    );
    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare");

    let mut context = ContextBuilder::new()
        .with_variables([("ready".to_string(), json!(false))].into_iter().collect())
        .build();
    let outcome = Runner::new().run(&program, &mut context).await;

    assert_eq!(outcome.flow, ControlFlow::Error);
    assert!(outcome.failure.expect("failure").message.contains("still false"));
}

#[tokio::test]
async fn click_goes_through_the_registered_device() {
    #[derive(Default)]
    struct RecordingPointer {
        clicks: std::sync::Mutex<Vec<(i32, i32, MouseButton)>>,
    }

    #[async_trait::async_trait]
    impl PointerDevice for RecordingPointer {
        async fn click(&self, x: i32, y: i32, button: MouseButton) -> anyhow::Result<()> {
            self.clicks.lock().expect("clicks").push((x, y, button));
            Ok(())
        }
    }

    let registry = registry();
    let mut tree = CommandTree::new();
    add_builtin(&mut tree, &registry, &Location::Root, CLICK_KIND, json!({ "x": 4, "y": 2, "button": "right" }));

    let without_device = Program::prepare(&tree, &registry, &stepflow_engine::Services::new());
    assert!(matches!(without_device, Err(PrepareError::Instantiate { .. })));

    let pointer = Arc::new(RecordingPointer::default());
    let mut services = stepflow_engine::Services::new();
    services.insert::<dyn PointerDevice>(pointer.clone());
    let program = Program::prepare(&tree, &registry, &services).expect("prepare");
    let outcome = Runner::new().run(&program, &mut ContextBuilder::new().build()).await;

    assert!(outcome.succeeded());
    assert_eq!(*pointer.clicks.lock().expect("clicks"), vec![(4, 2, MouseButton::Right)]);
}

#[tokio::test]
async fn stale_trees_must_be_migrated_before_preparing() {
    let registry = registry();
    let wait = registry.get(WAIT_KIND).expect("wait").clone();
    let mut tree = CommandTree::new();
    let legacy = Settings::from_value(WAIT_KIND, 1, json!({ "milliseconds": 0 })).expect("v1");
    tree.add_with_settings(wait.as_ref(), legacy, &Location::Root, None).expect("add");

    let prepared = Program::prepare(&tree, &registry, &stepflow_engine::Services::new());
    assert!(matches!(prepared, Err(PrepareError::Invalid { ref issues }) if issues.len() == 1));

    let report = migrate_tree(&mut tree, &registry);
    assert!(report.is_clean());
    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare after migration");
    let outcome = Runner::new().run(&program, &mut ContextBuilder::new().build()).await;
    assert!(outcome.succeeded());
}

#[test]
fn every_builtin_migration_is_idempotent() {
    let registry = registry();
    let legacy = [
        (WAIT_KIND, json!({ "milliseconds": 250 })),
        (SET_KIND, json!({ "name": "x", "value": "${{ vars.y }}" })),
        (WHILE_KIND, json!({ "condition_expr": "vars.go", "max_iterations": 4 })),
        (CLICK_KIND, json!({ "x": 1, "y": 2 })),
    ];

    for descriptor in registry.all() {
        let defaults = descriptor.create_default_settings();
        assert_eq!(defaults.version(), descriptor.latest_settings_version(), "{}", descriptor.kind());
        assert_eq!(descriptor.migrate_to_latest(&defaults).expect("migrate defaults"), defaults, "{}", descriptor.kind());
    }

    for (kind, fields) in legacy {
        let descriptor = registry.get(kind).expect("descriptor");
        let settings = Settings::from_value(kind, 1, fields).expect("v1");
        let once = descriptor.migrate_to_latest(&settings).expect("first migration");
        let twice = descriptor.migrate_to_latest(&once).expect("second migration");
        assert_eq!(once, twice, "{kind}");
        assert_eq!(once.version(), descriptor.latest_settings_version());
        assert!(descriptor.validate_settings(&once).is_empty(), "{kind}");
    }
}

#[tokio::test]
async fn false_condition_with_empty_then_runs_only_else() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let conditional = add_builtin(&mut tree, &registry, &Location::Root, IF_KIND, json!({ "condition": "false" }));
    let otherwise = add_scripted(&mut tree, &Location::block(conditional, "else"), "else", ControlFlow::Next);

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(outcome.flow, ControlFlow::Next);
    assert_eq!(log.entries(), vec!["else"]);
    assert_eq!(started_ids(&events), vec![conditional, otherwise]);
}

#[tokio::test]
async fn break_inside_a_conditional_is_consumed_by_the_enclosing_loop() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    let body = Location::block(looping, "body");
    add_scripted(&mut tree, &body, "tick", ControlFlow::Next);
    let conditional = add_builtin(&mut tree, &registry, &body, IF_KIND, json!({ "condition": "true" }));
    add_signal(&mut tree, &Location::block(conditional, "then"), BREAK_KIND);
    add_scripted(&mut tree, &body, "unreached", ControlFlow::Next);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, events) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["tick", "after"]);
    assert_eq!(outcome.flow, ControlFlow::Next);
    assert!(outcome.succeeded());
    let loop_finished = events.iter().find_map(|event| match event {
        RunEvent::CommandFinished { id, flow, .. } if *id == looping => Some(*flow),
        _ => None,
    });
    assert_eq!(loop_finished, Some(ControlFlow::Next));
}

#[tokio::test]
async fn continue_through_a_conditional_rechecks_the_loop_condition() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        WHILE_KIND,
        json!({ "condition": "vars.go == \"yes\"", "max_iterations": 5 }),
    );
    let body = Location::block(looping, "body");
    add_builtin(&mut tree, &registry, &body, SET_KIND, json!({ "name": "go", "value": { "source": "literal", "value": "no" } }));
    add_scripted(&mut tree, &body, "tick", ControlFlow::Next);
    let conditional = add_builtin(&mut tree, &registry, &body, IF_KIND, json!({ "condition": "true" }));
    add_signal(&mut tree, &Location::block(conditional, "then"), CONTINUE_KIND);
    add_scripted(&mut tree, &body, "skipped", ControlFlow::Next);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _, context) = run_with_variables(&tree, &log, json!({ "go": "yes" })).await;

    assert_eq!(log.entries(), vec!["tick", "after"]);
    assert_eq!(outcome.flow, ControlFlow::Next);
    assert!(outcome.failure.is_none());
    assert_eq!(context.scope().try_get("go"), Some(&json!("no")));
}

#[tokio::test]
async fn inner_loop_break_does_not_end_the_outer_loop() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let outer = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 2 }));
    let outer_body = Location::block(outer, "body");
    let inner = add_builtin(&mut tree, &registry, &outer_body, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    let conditional = add_builtin(&mut tree, &registry, &Location::block(inner, "body"), IF_KIND, json!({ "condition": "true" }));
    add_signal(&mut tree, &Location::block(conditional, "then"), BREAK_KIND);
    add_scripted(&mut tree, &outer_body, "outer-tail", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["outer-tail", "outer-tail"]);
    assert_eq!(outcome.flow, ControlFlow::Error);
    assert_eq!(outcome.failure.expect("failure").id, outer);
}

#[tokio::test]
async fn stop_signal_escapes_nested_blocks_without_failing() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    let body = Location::block(looping, "body");
    add_scripted(&mut tree, &body, "tick", ControlFlow::Next);
    let conditional = add_builtin(&mut tree, &registry, &body, IF_KIND, json!({ "condition": "false" }));
    add_signal(&mut tree, &Location::block(conditional, "else"), STOP_KIND);
    add_scripted(&mut tree, &Location::Root, "after", ControlFlow::Next);

    let (outcome, _) = run(&tree, &log).await;

    assert_eq!(log.entries(), vec!["tick"]);
    assert_eq!(outcome.flow, ControlFlow::Stop);
    assert!(!outcome.cancelled);
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn fail_reports_its_resolved_message_after_a_loop_ends_normally() {
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        WHILE_KIND,
        json!({ "condition": "vars.go == \"yes\"", "max_iterations": 3 }),
    );
    add_builtin(
        &mut tree,
        &registry,
        &Location::block(looping, "body"),
        SET_KIND,
        json!({ "name": "go", "value": { "source": "literal", "value": "no" } }),
    );
    let fail = add_builtin(
        &mut tree,
        &registry,
        &Location::Root,
        FAIL_KIND,
        json!({ "message": { "source": "template", "value": "bye ${{ vars.go }}" } }),
    );

    let program = Program::prepare(&tree, &registry, &stepflow_engine::Services::new()).expect("prepare");
    let logger = Arc::new(RingBufferLogger::new(10));
    let mut context = ContextBuilder::new()
        .with_variables([("go".to_string(), json!("yes"))].into_iter().collect())
        .with_logger(logger.clone())
        .build();
    let outcome = Runner::new().run(&program, &mut context).await;

    assert_eq!(outcome.flow, ControlFlow::Error);
    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.id, fail);
    assert_eq!(failure.message, "bye no");
    assert!(
        logger
            .all()
            .iter()
            .any(|entry| entry.level == stepflow_engine::LogLevel::Error && entry.message == "bye no")
    );
}

#[tokio::test]
async fn error_signal_without_an_error_value_carries_the_same_message_everywhere() {
    let log = Arc::new(ExecutionLog::default());
    let registry = registry();
    let mut tree = CommandTree::new();
    let looping = add_builtin(&mut tree, &registry, &Location::Root, WHILE_KIND, json!({ "condition": "true", "max_iterations": 5 }));
    let signalling = add_scripted(&mut tree, &Location::block(looping, "body"), "oops", ControlFlow::Error);

    let (outcome, events) = run(&tree, &log).await;

    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.id, signalling);
    assert_eq!(failure.message, SIGNALLED_ERROR);

    let finished: Vec<(stepflow_engine::CommandId, Option<String>)> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::CommandFinished { id, message, .. } => Some((*id, message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![(signalling, Some(SIGNALLED_ERROR.to_string())), (looping, None)]);
}
