//! Block-structured command tree used while authoring.
//!
//! Nodes live in an arena keyed by [`CommandId`]; blocks store child ids in
//! order. Every node belongs to exactly one parent block or to the root
//! sequence, and removing a node removes its whole subtree.

use std::collections::HashMap;

use indexmap::IndexMap;
use stepflow_registry::{CommandDescriptor, CommandRegistry};
use stepflow_types::{BreakpointFlags, CommandId, Settings};
use thiserror::Error;

/// Errors raised by tree edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("command {id} does not exist")]
    UnknownCommand { id: CommandId },

    #[error("command {id} has no block named '{block}'")]
    UnknownBlock { id: CommandId, block: String },

    #[error("cannot move command {id} into its own subtree at {target}")]
    CycleDetected { id: CommandId, target: CommandId },

    #[error("command kind '{kind}' does not support breakpoints")]
    BreakpointsUnsupported { kind: String },

    #[error("settings of kind '{actual}' cannot be assigned to a '{expected}' command")]
    KindMismatch { expected: String, actual: String },

    #[error("index {index} is out of bounds for a sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Where a command sits: the root sequence or a named block of a parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Root,
    Block { parent: CommandId, block: String },
}

impl Location {
    pub fn block(parent: CommandId, block: impl Into<String>) -> Self {
        Location::Block {
            parent,
            block: block.into(),
        }
    }
}

/// One authored command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandNode {
    id: CommandId,
    kind: String,
    enabled: bool,
    settings: Settings,
    breakpoints: BreakpointFlags,
    blocks: IndexMap<String, Vec<CommandId>>,
    location: Location,
}

impl CommandNode {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn breakpoints(&self) -> BreakpointFlags {
        self.breakpoints
    }

    /// Child blocks in slot declaration order.
    pub fn blocks(&self) -> &IndexMap<String, Vec<CommandId>> {
        &self.blocks
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    nodes: HashMap<CommandId, CommandNode>,
    root: Vec<CommandId>,
    next_id: u64,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &[CommandId] {
        &self.root
    }

    pub fn get(&self, id: CommandId) -> Option<&CommandNode> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: CommandId) -> Result<&CommandNode, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::UnknownCommand { id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `location`, in order.
    pub fn children(&self, location: &Location) -> Result<&[CommandId], TreeError> {
        match location {
            Location::Root => Ok(&self.root),
            Location::Block { parent, block } => self
                .node(*parent)?
                .blocks
                .get(block)
                .map(Vec::as_slice)
                .ok_or_else(|| TreeError::UnknownBlock {
                    id: *parent,
                    block: block.clone(),
                }),
        }
    }

    /// All node ids in depth-first pre-order, starting from the root sequence.
    pub fn preorder(&self) -> Vec<CommandId> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<CommandId> = self.root.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            ordered.push(id);
            if let Some(node) = self.nodes.get(&id) {
                for children in node.blocks.values().rev() {
                    stack.extend(children.iter().rev().copied());
                }
            }
        }
        ordered
    }

    /// Adds a command with the descriptor's default settings.
    ///
    /// `index` of `None` appends; otherwise the command is inserted before the
    /// child currently at `index`.
    pub fn add(&mut self, descriptor: &dyn CommandDescriptor, location: &Location, index: Option<usize>) -> Result<CommandId, TreeError> {
        self.add_with_settings(descriptor, descriptor.create_default_settings(), location, index)
    }

    /// Adds a command with caller-provided settings, which may be of an older version.
    ///
    /// One empty block is created for every slot the descriptor declares.
    pub fn add_with_settings(
        &mut self,
        descriptor: &dyn CommandDescriptor,
        settings: Settings,
        location: &Location,
        index: Option<usize>,
    ) -> Result<CommandId, TreeError> {
        if settings.kind() != descriptor.kind() {
            return Err(TreeError::KindMismatch {
                expected: descriptor.kind().to_string(),
                actual: settings.kind().to_string(),
            });
        }
        let insert_at = self.checked_insert_index(location, index)?;

        let id = CommandId::new(self.next_id);
        self.next_id += 1;
        let blocks = descriptor
            .block_slots()
            .iter()
            .map(|slot| (slot.name().to_string(), Vec::new()))
            .collect();
        self.nodes.insert(
            id,
            CommandNode {
                id,
                kind: descriptor.kind().to_string(),
                enabled: true,
                settings,
                breakpoints: BreakpointFlags::default(),
                blocks,
                location: location.clone(),
            },
        );
        self.sequence_mut(location)?.insert(insert_at, id);
        Ok(id)
    }

    /// Removes `id` and its whole subtree, returning every removed id.
    pub fn remove(&mut self, id: CommandId) -> Result<Vec<CommandId>, TreeError> {
        let location = self.node(id)?.location.clone();
        self.sequence_mut(&location)?.retain(|child| *child != id);

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                pending.extend(node.blocks.into_values().flatten());
                removed.push(current);
            }
        }
        Ok(removed)
    }

    /// Moves `id` (with its subtree) to `location`.
    ///
    /// Moving a command into its own subtree is rejected.
    pub fn move_to(&mut self, id: CommandId, location: &Location, index: Option<usize>) -> Result<(), TreeError> {
        let current = self.node(id)?.location.clone();
        if let Location::Block { parent, .. } = location
            && (*parent == id || self.is_descendant(id, *parent))
        {
            return Err(TreeError::CycleDetected { id, target: *parent });
        }
        // validate the target before detaching
        let target_len = self.children(location)?.len();

        let source = self.sequence_mut(&current)?;
        let from = source.iter().position(|child| *child == id).ok_or(TreeError::UnknownCommand { id })?;
        let same_sequence = current == *location;
        let effective_len = if same_sequence { target_len - 1 } else { target_len };
        let insert_at = match index {
            None => effective_len,
            Some(index) if index <= effective_len => index,
            Some(index) => return Err(TreeError::IndexOutOfBounds { index, len: effective_len }),
        };

        self.sequence_mut(&current)?.remove(from);
        self.sequence_mut(location)?.insert(insert_at, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.location = location.clone();
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, id: CommandId, enabled: bool) -> Result<(), TreeError> {
        self.node_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Replaces the settings of `id` wholesale, returning the previous value.
    pub fn replace_settings(&mut self, id: CommandId, settings: Settings) -> Result<Settings, TreeError> {
        let node = self.node_mut(id)?;
        if node.kind != settings.kind() {
            return Err(TreeError::KindMismatch {
                expected: node.kind.clone(),
                actual: settings.kind().to_string(),
            });
        }
        Ok(std::mem::replace(&mut node.settings, settings))
    }

    /// Sets breakpoint flags, which only kinds that declare breakpoint support accept.
    pub fn set_breakpoints(&mut self, registry: &CommandRegistry, id: CommandId, flags: BreakpointFlags) -> Result<(), TreeError> {
        let node = self.node_mut(id)?;
        let supported = registry
            .try_get(&node.kind)
            .is_some_and(|descriptor| descriptor.supports_breakpoints());
        if flags.is_set() && !supported {
            return Err(TreeError::BreakpointsUnsupported { kind: node.kind.clone() });
        }
        node.breakpoints = flags;
        Ok(())
    }

    /// True when `candidate` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, ancestor: CommandId, candidate: CommandId) -> bool {
        let mut cursor = self.nodes.get(&candidate).map(|node| &node.location);
        while let Some(Location::Block { parent, .. }) = cursor {
            if *parent == ancestor {
                return true;
            }
            cursor = self.nodes.get(parent).map(|node| &node.location);
        }
        false
    }

    /// Appends a block that a descriptor does not declare; used when loading documents
    /// so that validation can report the mismatch instead of dropping children silently.
    pub(crate) fn ensure_block(&mut self, id: CommandId, block: &str) -> Result<(), TreeError> {
        self.node_mut(id)?.blocks.entry(block.to_string()).or_default();
        Ok(())
    }

    fn node_mut(&mut self, id: CommandId) -> Result<&mut CommandNode, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::UnknownCommand { id })
    }

    fn sequence_mut(&mut self, location: &Location) -> Result<&mut Vec<CommandId>, TreeError> {
        match location {
            Location::Root => Ok(&mut self.root),
            Location::Block { parent, block } => {
                let parent_id = *parent;
                self.node_mut(parent_id)?
                    .blocks
                    .get_mut(block)
                    .ok_or_else(|| TreeError::UnknownBlock {
                        id: parent_id,
                        block: block.clone(),
                    })
            }
        }
    }

    fn checked_insert_index(&self, location: &Location, index: Option<usize>) -> Result<usize, TreeError> {
        let len = self.children(location)?.len();
        match index {
            None => Ok(len),
            Some(index) if index <= len => Ok(index),
            Some(index) => Err(TreeError::IndexOutOfBounds { index, len }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{
        builtin_descriptors,
        control::{IF_KIND, WHILE_KIND},
        time::WAIT_KIND,
    };
    use crate::config::EngineConfig;

    fn registry() -> CommandRegistry {
        CommandRegistry::new(builtin_descriptors(&EngineConfig::default())).expect("builtin registry")
    }

    fn add(tree: &mut CommandTree, registry: &CommandRegistry, kind: &str, location: &Location) -> CommandId {
        let descriptor = registry.get(kind).expect("registered kind");
        tree.add(descriptor.as_ref(), location, None).expect("add command")
    }

    #[test]
    fn composite_nodes_get_one_block_per_slot() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let conditional = add(&mut tree, &registry, IF_KIND, &Location::Root);

        let blocks: Vec<&str> = tree.node(conditional).expect("node").blocks().keys().map(String::as_str).collect();
        assert_eq!(blocks, ["then", "else"]);
        assert!(tree.children(&Location::block(conditional, "then")).expect("then").is_empty());
    }

    #[test]
    fn insert_respects_index_and_bounds() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let first = add(&mut tree, &registry, WAIT_KIND, &Location::Root);
        let wait = registry.get(WAIT_KIND).expect("wait");
        let second = tree.add(wait.as_ref(), &Location::Root, Some(0)).expect("insert at front");
        assert_eq!(tree.root(), [second, first]);

        let result = tree.add(wait.as_ref(), &Location::Root, Some(5));
        assert_eq!(result, Err(TreeError::IndexOutOfBounds { index: 5, len: 2 }));
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let outer = add(&mut tree, &registry, WHILE_KIND, &Location::Root);
        let inner = add(&mut tree, &registry, IF_KIND, &Location::block(outer, "body"));
        let leaf = add(&mut tree, &registry, WAIT_KIND, &Location::block(inner, "then"));

        let mut removed = tree.remove(outer).expect("remove");
        removed.sort();
        assert_eq!(removed, [outer, inner, leaf]);
        assert!(tree.is_empty());
        assert!(tree.root().is_empty());
    }

    #[test]
    fn moving_into_own_subtree_is_rejected() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let outer = add(&mut tree, &registry, WHILE_KIND, &Location::Root);
        let inner = add(&mut tree, &registry, IF_KIND, &Location::block(outer, "body"));

        let result = tree.move_to(outer, &Location::block(inner, "then"), None);
        assert_eq!(result, Err(TreeError::CycleDetected { id: outer, target: inner }));
        let result = tree.move_to(outer, &Location::block(outer, "body"), None);
        assert_eq!(result, Err(TreeError::CycleDetected { id: outer, target: outer }));
    }

    #[test]
    fn move_reorders_within_and_across_sequences() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let a = add(&mut tree, &registry, WAIT_KIND, &Location::Root);
        let b = add(&mut tree, &registry, WAIT_KIND, &Location::Root);
        let loop_id = add(&mut tree, &registry, WHILE_KIND, &Location::Root);

        tree.move_to(a, &Location::Root, None).expect("move to end");
        assert_eq!(tree.root(), [b, loop_id, a]);

        tree.move_to(b, &Location::block(loop_id, "body"), Some(0)).expect("move into body");
        assert_eq!(tree.root(), [loop_id, a]);
        assert_eq!(tree.children(&Location::block(loop_id, "body")).expect("body"), [b]);
        assert_eq!(tree.node(b).expect("b").location(), &Location::block(loop_id, "body"));
        assert!(tree.is_descendant(loop_id, b));
    }

    #[test]
    fn breakpoints_require_kind_support() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let wait = add(&mut tree, &registry, WAIT_KIND, &Location::Root);
        let conditional = add(&mut tree, &registry, IF_KIND, &Location::Root);
        let flags = BreakpointFlags { before: true, after: false };

        tree.set_breakpoints(&registry, wait, flags).expect("wait supports breakpoints");
        assert_eq!(tree.node(wait).expect("wait").breakpoints(), flags);
        let result = tree.set_breakpoints(&registry, conditional, flags);
        assert!(matches!(result, Err(TreeError::BreakpointsUnsupported { .. })));
    }

    #[test]
    fn replace_settings_rejects_foreign_kind() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let wait = add(&mut tree, &registry, WAIT_KIND, &Location::Root);
        let foreign = registry.get(IF_KIND).expect("if").create_default_settings();

        let result = tree.replace_settings(wait, foreign);
        assert!(matches!(result, Err(TreeError::KindMismatch { .. })));
    }

    #[test]
    fn preorder_walks_depth_first() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let first = add(&mut tree, &registry, IF_KIND, &Location::Root);
        let then_leaf = add(&mut tree, &registry, WAIT_KIND, &Location::block(first, "then"));
        let else_leaf = add(&mut tree, &registry, WAIT_KIND, &Location::block(first, "else"));
        let last = add(&mut tree, &registry, WAIT_KIND, &Location::Root);

        assert_eq!(tree.preorder(), [first, then_leaf, else_leaf, last]);
    }
}
