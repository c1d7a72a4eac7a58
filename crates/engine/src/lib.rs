//! # Stepflow Engine
//!
//! Authoring model and interpreter for Stepflow scripts: trees of typed
//! commands whose composite kinds own named child blocks.
//!
//! ## Pipeline
//!
//! 1. A [`ScriptDocument`] is loaded and turned into a [`CommandTree`].
//! 2. [`migrate_tree`] brings every node's settings to its kind's latest version.
//! 3. [`Program::prepare`] validates the tree and creates one command per enabled node.
//! 4. [`Runner::run`] executes the program against an [`ExecutionContext`], or
//!    [`drive_session`] does so under pause, resume and cancel controls.
//!
//! ## Usage
//!
//! ```rust
//! use stepflow_engine::{
//!     CommandRegistry, ContextBuilder, EngineConfig, Program, Runner, ScriptDocument, Services, builtin_descriptors, migrate_tree,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let registry = CommandRegistry::new(builtin_descriptors(&EngineConfig::default()))?;
//! let document: ScriptDocument = serde_yaml::from_str(
//!     r#"
//! variables: { greeting: hello }
//! steps:
//!   - kind: log.message
//!     version: 1
//!     settings: { message: { source: template, value: "${{ vars.greeting }}" } }
//! "#,
//! )?;
//!
//! let (mut tree, issues) = document.to_tree(&registry);
//! assert!(issues.is_empty());
//! migrate_tree(&mut tree, &registry);
//!
//! let program = Program::prepare(&tree, &registry, &Services::new())?;
//! let mut context = ContextBuilder::new().with_variables(document.variables.clone()).build();
//! let outcome = Runner::new().run(&program, &mut context).await;
//! assert!(outcome.succeeded());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **`tree`**: arena-backed command tree and its edit operations
//! - **`commands`**: built-in command kinds
//! - **`executor`**: program preparation and the control-flow runner
//! - **`session`**: debug sessions with pause, resume, cancel and breakpoints
//! - **`resolve`**: value sources, templates and condition evaluation

pub mod commands;
pub mod condition_syntax;
pub mod config;
pub mod context;
pub mod delay;
pub mod document;
pub mod executor;
pub mod logging;
pub mod migrate;
pub mod resolve;
pub mod scope;
pub mod session;
pub mod tree;
pub mod validate;

pub use commands::builtin_descriptors;
pub use config::{EngineConfig, default_config_path, load_config, load_config_from_path, save_config_to_path};
pub use context::ContextBuilder;
pub use delay::TokioDelay;
pub use document::{DocumentIssue, ScriptDocument, StepDocument, load_script_file, save_script_file};
pub use executor::{PrepareError, Program, RunOptions, Runner, SIGNALLED_ERROR, StepInfo, StepInterceptor};
pub use logging::{LogEntry, RingBufferLogger, TracingRunLogger};
pub use migrate::{MigrationError, MigrationFailure, MigrationReport, migrate_tree};
pub use resolve::TemplateResolver;
pub use scope::MemoryScope;
pub use session::drive_session;
pub use tree::{CommandNode, CommandTree, Location, TreeError};
pub use validate::{ValidationIssue, validate_tree};

pub use stepflow_registry::{
    Command, CommandDescriptor, CommandRegistry, ExecutionContext, Invocation, LogLevel, RunLogger, Services, ValueResolver, VariableScope,
};
pub use stepflow_types::{
    BreakpointFlags, CommandError, CommandFailure, CommandId, ControlFlow, PauseReason, RunControl, RunEvent, RunOutcome, Settings,
    ValueSource,
};
