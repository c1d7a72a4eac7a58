//! Script documents: the persisted, human-editable form of a command tree.
//!
//! Documents are YAML or JSON. Each step records its kind, the version of its
//! settings, and the settings fields; composite steps nest their children
//! under `blocks`:
//!
//! ```yaml
//! name: retry login
//! variables:
//!   attempts: 0
//! steps:
//!   - kind: control.while
//!     version: 2
//!     settings: { condition: "vars.attempts != 3", max_iterations: 10 }
//!     blocks:
//!       body:
//!         - kind: time.wait
//!           version: 1
//!           settings: { milliseconds: 500 }
//! ```
//!
//! Loading keeps older settings versions as they are; migrating them is a
//! separate, explicit step.

use std::{fmt, fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepflow_registry::CommandRegistry;
use stepflow_types::{BreakpointFlags, CommandId, Settings};

use crate::tree::{CommandTree, Location};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Initial variables for a run.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    pub kind: String,
    pub version: u32,
    #[serde(default = "enabled_by_default", skip_serializing_if = "is_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub blocks: IndexMap<String, Vec<StepDocument>>,
    #[serde(default, skip_serializing_if = "no_breakpoints")]
    pub breakpoints: BreakpointFlags,
}

fn enabled_by_default() -> bool {
    true
}

fn is_enabled(enabled: &bool) -> bool {
    *enabled
}

fn no_breakpoints(flags: &BreakpointFlags) -> bool {
    !flags.is_set()
}

/// A step that could not be placed in the tree, with its document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for DocumentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl ScriptDocument {
    /// Builds a tree from the document.
    ///
    /// Steps of unknown kinds, or whose settings envelope is invalid, are
    /// skipped together with their children and reported. Blocks a kind does
    /// not declare are kept so that validation reports them.
    pub fn to_tree(&self, registry: &CommandRegistry) -> (CommandTree, Vec<DocumentIssue>) {
        let mut tree = CommandTree::new();
        let mut issues = Vec::new();
        add_steps(&mut tree, registry, &self.steps, &Location::Root, "steps", &mut issues);
        (tree, issues)
    }

    /// Document for `tree` with no name and no variables.
    pub fn from_tree(tree: &CommandTree) -> Self {
        Self {
            name: None,
            variables: IndexMap::new(),
            steps: steps_from_tree(tree, tree.root()),
        }
    }
}

fn add_steps(
    tree: &mut CommandTree,
    registry: &CommandRegistry,
    steps: &[StepDocument],
    location: &Location,
    path: &str,
    issues: &mut Vec<DocumentIssue>,
) {
    for (position, step) in steps.iter().enumerate() {
        let step_path = format!("{path}[{position}]");
        let report = |issues: &mut Vec<DocumentIssue>, message: String| {
            issues.push(DocumentIssue {
                path: step_path.clone(),
                message,
            })
        };

        let Some(descriptor) = registry.try_get(&step.kind) else {
            report(issues, format!("unknown command kind '{}'", step.kind));
            continue;
        };
        let settings = match Settings::new(step.kind.clone(), step.version, step.settings.clone()) {
            Ok(settings) => settings,
            Err(error) => {
                report(issues, error.to_string());
                continue;
            }
        };
        let id = match tree.add_with_settings(descriptor.as_ref(), settings, location, None) {
            Ok(id) => id,
            Err(error) => {
                report(issues, error.to_string());
                continue;
            }
        };
        if !step.enabled
            && let Err(error) = tree.set_enabled(id, false)
        {
            report(issues, error.to_string());
        }
        if step.breakpoints.is_set()
            && let Err(error) = tree.set_breakpoints(registry, id, step.breakpoints)
        {
            report(issues, error.to_string());
        }

        for (block, children) in &step.blocks {
            if let Err(error) = tree.ensure_block(id, block) {
                report(issues, error.to_string());
                continue;
            }
            add_steps(
                tree,
                registry,
                children,
                &Location::block(id, block.clone()),
                &format!("{step_path}.blocks.{block}"),
                issues,
            );
        }
    }
}

fn steps_from_tree(tree: &CommandTree, sequence: &[CommandId]) -> Vec<StepDocument> {
    sequence
        .iter()
        .filter_map(|id| tree.get(*id))
        .map(|node| StepDocument {
            kind: node.kind().to_string(),
            version: node.settings().version(),
            enabled: node.enabled(),
            settings: node.settings().fields().clone(),
            blocks: node
                .blocks()
                .iter()
                .map(|(name, children)| (name.clone(), steps_from_tree(tree, children)))
                .collect(),
            breakpoints: node.breakpoints(),
        })
        .collect()
}

/// Loads a script from a YAML or JSON file.
pub fn load_script_file(path: &Path) -> Result<ScriptDocument> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read script {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("failed to parse script {}", path.display()))
}

/// Saves a script as JSON when the path ends in `.json`, otherwise as YAML.
pub fn save_script_file(path: &Path, document: &ScriptDocument) -> Result<()> {
    let is_json = path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let content = if is_json {
        serde_json::to_string_pretty(document)?
    } else {
        serde_yaml::to_string(document)?
    };
    fs::write(path, content).with_context(|| format!("failed to write script {}", path.display()))
}
