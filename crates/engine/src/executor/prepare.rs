//! Lowering a validated command tree into a runnable program.

use indexmap::IndexMap;
use stepflow_registry::{Command, CommandRegistry, Services};
use stepflow_types::{BreakpointFlags, CommandError, CommandId};
use thiserror::Error;
use tracing::debug;

use crate::{
    tree::CommandTree,
    validate::{ValidationIssue, validate_tree},
};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("script has {} validation issue(s)", issues.len())]
    Invalid { issues: Vec<ValidationIssue> },

    #[error("failed to create command {id} ({kind})")]
    Instantiate {
        id: CommandId,
        kind: String,
        #[source]
        source: CommandError,
    },
}

/// One prepared command. Disabled commands keep their place but carry no
/// runnable command and no children.
pub struct ProgramNode {
    id: CommandId,
    kind: String,
    breakpoints: BreakpointFlags,
    command: Option<Box<dyn Command>>,
    blocks: IndexMap<String, Vec<usize>>,
}

impl ProgramNode {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn breakpoints(&self) -> BreakpointFlags {
        self.breakpoints
    }

    pub(crate) fn command(&self) -> Option<&dyn Command> {
        self.command.as_deref()
    }

    pub(crate) fn block(&self, name: &str) -> Option<&[usize]> {
        self.blocks.get(name).map(Vec::as_slice)
    }
}

/// Immutable, runnable form of a command tree.
///
/// Nodes are stored flat; sequences refer to them by index.
pub struct Program {
    nodes: Vec<ProgramNode>,
    root: Vec<usize>,
}

impl Program {
    /// Validates `tree` and creates one command per enabled node.
    ///
    /// Fails with every validation issue at once, or with the first command
    /// that cannot be created (typically a missing host service).
    pub fn prepare(tree: &CommandTree, registry: &CommandRegistry, services: &Services) -> Result<Self, PrepareError> {
        let issues = validate_tree(tree, registry);
        if !issues.is_empty() {
            return Err(PrepareError::Invalid { issues });
        }

        let mut nodes = Vec::with_capacity(tree.len());
        let root = lower_sequence(tree, registry, services, tree.root(), &mut nodes)?;
        debug!(commands = nodes.len(), "program prepared");
        Ok(Self { nodes, root })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn root(&self) -> &[usize] {
        &self.root
    }

    pub(crate) fn node(&self, index: usize) -> &ProgramNode {
        &self.nodes[index]
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("commands", &self.nodes.len())
            .field("root", &self.root.len())
            .finish()
    }
}

fn lower_sequence(
    tree: &CommandTree,
    registry: &CommandRegistry,
    services: &Services,
    sequence: &[CommandId],
    nodes: &mut Vec<ProgramNode>,
) -> Result<Vec<usize>, PrepareError> {
    let mut indexes = Vec::with_capacity(sequence.len());
    for &id in sequence {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let index = nodes.len();
        nodes.push(ProgramNode {
            id,
            kind: node.kind().to_string(),
            breakpoints: node.breakpoints(),
            command: None,
            blocks: IndexMap::new(),
        });
        indexes.push(index);

        if !node.enabled() {
            continue;
        }

        let instantiate_error = |source: CommandError| PrepareError::Instantiate {
            id,
            kind: node.kind().to_string(),
            source,
        };
        let descriptor = registry
            .get(node.kind())
            .map_err(|error| instantiate_error(CommandError::failed(error.to_string())))?;
        let command = descriptor.create_command(node.settings(), services).map_err(instantiate_error)?;

        let mut blocks = IndexMap::with_capacity(node.blocks().len());
        for (name, children) in node.blocks() {
            blocks.insert(name.clone(), lower_sequence(tree, registry, services, children, nodes)?);
        }

        let prepared = &mut nodes[index];
        prepared.command = Some(command);
        prepared.blocks = blocks;
    }
    Ok(indexes)
}
