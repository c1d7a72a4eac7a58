use std::{io::BufRead, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde_json::Value;
use stepflow_engine::{
    CommandId, CommandRegistry, CommandTree, ContextBuilder, EngineConfig, LogLevel, PrepareError, Program, RingBufferLogger, RunControl, RunEvent,
    RunLogger, RunOptions, RunOutcome, Runner, ScriptDocument, Services, TracingRunLogger, builtin_descriptors,
    commands::input::{MouseButton, PointerDevice},
    default_config_path, drive_session, load_config, load_config_from_path, load_script_file, migrate_tree, save_config_to_path,
    save_script_file, validate_tree,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{Level, info, warn};

/// Author, check and run Stepflow scripts.
#[derive(Parser, Debug)]
#[command(name = "stepflow", version, about)]
struct Cli {
    /// Engine configuration file (defaults to STEPFLOW_CONFIG_PATH or the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List registered command kinds, optionally ranked against a query
    Kinds { query: Option<String> },

    /// Write the default engine configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a script without running it
    Check { script: PathBuf },

    /// Upgrade every step's settings to its kind's latest version
    Migrate {
        script: PathBuf,

        /// Write the migrated script back instead of printing it
        #[arg(long)]
        write: bool,
    },

    /// Run a script
    Run {
        script: PathBuf,

        /// Simulate commands that support it instead of executing them
        #[arg(long)]
        dry_run: bool,

        /// Override a script variable; the value is parsed as JSON when possible
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
        variables: Vec<(String, Value)>,

        /// Honor breakpoints and read pause/resume/cancel controls from stdin
        #[arg(long)]
        debug: bool,

        /// Print run events as JSON lines
        #[arg(long)]
        json_events: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    if let CliCommand::InitConfig { force } = cli.command {
        return init_config(cli.config.unwrap_or_else(default_config_path), force);
    }
    let config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };
    let registry = CommandRegistry::new(builtin_descriptors(&config))?;

    match cli.command {
        CliCommand::InitConfig { .. } => Ok(()),
        CliCommand::Kinds { query } => list_kinds(&registry, query.as_deref().unwrap_or_default()),
        CliCommand::Check { script } => check_script(&registry, &script),
        CliCommand::Migrate { script, write } => migrate_script(&registry, &script, write),
        CliCommand::Run {
            script,
            dry_run,
            variables,
            debug,
            json_events,
        } => run_script(&registry, &config, &script, variables, RunOptions { dry_run }, debug, json_events).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_variable(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("variable name cannot be empty".into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite it", path.display());
    }
    save_config_to_path(&EngineConfig::default(), &path).with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn list_kinds(registry: &CommandRegistry, query: &str) -> Result<()> {
    for entry in registry.search(query, registry.len()) {
        let descriptor = registry.get(&entry.kind)?;
        println!(
            "{:<20} v{:<3} {}",
            entry.kind,
            descriptor.latest_settings_version(),
            descriptor.summary()
        );
    }
    Ok(())
}

/// Loads a script and builds its tree, failing on steps that could not be placed.
fn load_tree(registry: &CommandRegistry, script: &std::path::Path) -> Result<(ScriptDocument, CommandTree)> {
    let document = load_script_file(script)?;
    let (tree, issues) = document.to_tree(registry);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("{issue}");
        }
        bail!("{} step(s) in {} could not be loaded", issues.len(), script.display());
    }
    Ok((document, tree))
}

fn check_script(registry: &CommandRegistry, script: &std::path::Path) -> Result<()> {
    let (_, tree) = load_tree(registry, script)?;
    let issues = validate_tree(&tree, registry);
    if issues.is_empty() {
        println!("{}: ok ({} commands)", script.display(), tree.len());
        return Ok(());
    }
    for issue in &issues {
        println!("{issue}");
    }
    bail!("{} validation issue(s)", issues.len())
}

fn migrate_script(registry: &CommandRegistry, script: &std::path::Path, write: bool) -> Result<()> {
    let (document, mut tree) = load_tree(registry, script)?;
    let report = migrate_tree(&mut tree, registry);
    for failure in &report.failures {
        eprintln!("{failure}");
    }
    if !report.is_clean() {
        bail!("{} command(s) could not be migrated", report.failures.len());
    }

    let migrated = ScriptDocument {
        steps: ScriptDocument::from_tree(&tree).steps,
        ..document
    };
    if write {
        save_script_file(script, &migrated)?;
        info!(migrated = report.migrated.len(), unchanged = report.unchanged, "script migrated");
    } else {
        print!("{}", serde_yaml::to_string(&migrated).context("failed to encode script")?);
    }
    Ok(())
}

async fn run_script(
    registry: &CommandRegistry,
    config: &EngineConfig,
    script: &std::path::Path,
    overrides: Vec<(String, Value)>,
    options: RunOptions,
    debug: bool,
    json_events: bool,
) -> Result<()> {
    let (document, mut tree) = load_tree(registry, script)?;
    let report = migrate_tree(&mut tree, registry);
    if !report.migrated.is_empty() {
        info!(count = report.migrated.len(), "migrated stale settings before running");
    }

    let mut services = Services::new();
    services.insert::<dyn PointerDevice>(Arc::new(TracePointer));
    let program = match Program::prepare(&tree, registry, &services) {
        Ok(program) => program,
        Err(error) => {
            if let PrepareError::Invalid { issues } = &error {
                for issue in issues {
                    eprintln!("{issue}");
                }
            }
            return Err(error).with_context(|| format!("cannot run {}", script.display()));
        }
    };

    let mut variables: IndexMap<String, Value> = document.variables.clone();
    variables.extend(overrides);
    let history = Arc::new(RingBufferLogger::new(config.log_buffer_capacity));
    let mut context = ContextBuilder::new()
        .with_variables(variables)
        .with_logger(Arc::new(TeeLogger {
            history: Arc::clone(&history),
        }))
        .build();

    let (event_tx, event_rx) = unbounded_channel();
    let printer = tokio::spawn(print_events(event_rx, json_events));

    let outcome = if debug {
        let (control_tx, control_rx) = unbounded_channel();
        spawn_ctrl_c(control_tx.clone());
        spawn_stdin_controls(control_tx);
        drive_session(&program, &mut context, control_rx, event_tx, options).await
    } else {
        let cancellation = context.cancellation().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancellation.cancel();
            }
        });
        Runner::new().with_events(event_tx).with_options(options).run(&program, &mut context).await
    };
    let _ = printer.await;

    report_outcome(&outcome, &history)
}

fn report_outcome(outcome: &RunOutcome, history: &RingBufferLogger) -> Result<()> {
    if outcome.cancelled {
        bail!("run cancelled");
    }
    if let Some(failure) = &outcome.failure {
        for entry in history.recent(10) {
            eprintln!("  [{}] {}", entry.level, entry.message);
        }
        bail!("{} ({}) failed: {}", failure.id, failure.kind, failure.message);
    }
    Ok(())
}

async fn print_events(mut events: UnboundedReceiver<RunEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(error) => warn!(error = %error, "failed to encode run event"),
            }
            continue;
        }
        match event {
            RunEvent::CommandStarting { id, kind } => eprintln!("-> {id} {kind}"),
            RunEvent::CommandFinished {
                id,
                flow,
                message,
                duration_ms,
                ..
            } => match message {
                Some(message) => eprintln!("<- {id} {flow} in {duration_ms}ms: {message}"),
                None => eprintln!("<- {id} {flow} in {duration_ms}ms"),
            },
            RunEvent::Paused { id, reason } => eprintln!("paused at {id} ({reason:?}); type 'resume', 'pause' or 'cancel'"),
            RunEvent::Resumed { id } => eprintln!("resumed at {id}"),
            RunEvent::RunCompleted { outcome, .. } => eprintln!("run finished: {}", outcome.flow),
            RunEvent::RunStarted { .. } => {}
        }
    }
}

fn spawn_ctrl_c(controls: UnboundedSender<RunControl>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = controls.send(RunControl::Cancel);
        }
    });
}

/// Reads controls on a plain thread so a pending stdin read never holds up runtime shutdown.
fn spawn_stdin_controls(controls: UnboundedSender<RunControl>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let control = match line.trim() {
                "p" | "pause" => RunControl::Pause,
                "r" | "resume" | "c" | "continue" => RunControl::Resume,
                "q" | "cancel" => RunControl::Cancel,
                "" => continue,
                other => {
                    eprintln!("unknown control '{other}'");
                    continue;
                }
            };
            if controls.send(control).is_err() {
                break;
            }
        }
    });
}

/// Reports clicks in the log; the command-line host has no pointer to drive.
struct TracePointer;

#[async_trait]
impl PointerDevice for TracePointer {
    async fn click(&self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        info!(x, y, %button, "click");
        Ok(())
    }
}

/// Sends run log lines to tracing and keeps recent ones for failure reports.
struct TeeLogger {
    history: Arc<RingBufferLogger>,
}

impl RunLogger for TeeLogger {
    fn log(&self, level: LogLevel, command: Option<CommandId>, message: &str) {
        TracingRunLogger.log(level, command, message);
        self.history.log(level, command, message);
    }
}
