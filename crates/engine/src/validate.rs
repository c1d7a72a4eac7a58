//! Static checks over a command tree before it is prepared for a run.

use std::fmt;

use serde::Serialize;
use stepflow_registry::CommandRegistry;
use stepflow_types::CommandId;

use crate::tree::CommandTree;

/// One problem found in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub id: CommandId,
    pub kind: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.id, self.kind, self.message)
    }
}

/// Collects every issue in pre-order. An empty result means the tree can be prepared.
///
/// Checked per node: the kind is registered, settings are at the latest
/// version and pass the descriptor's validation, the node's blocks match the
/// declared slots, and each block's child count fits its slot.
pub fn validate_tree(tree: &CommandTree, registry: &CommandRegistry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for id in tree.preorder() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let mut report = |message: String| {
            issues.push(ValidationIssue {
                id,
                kind: node.kind().to_string(),
                message,
            })
        };

        let Some(descriptor) = registry.try_get(node.kind()) else {
            report(format!("unknown command kind '{}'", node.kind()));
            continue;
        };

        let latest = descriptor.latest_settings_version();
        if node.settings().version() != latest {
            report(format!(
                "settings are at v{} but the latest is v{latest}; migrate the script first",
                node.settings().version()
            ));
        } else {
            for problem in descriptor.validate_settings(node.settings()) {
                report(problem);
            }
        }

        for slot in descriptor.block_slots() {
            match node.blocks().get(slot.name()) {
                Some(children) => {
                    if let Some(problem) = slot.cardinality_problem(children.len()) {
                        report(problem);
                    }
                }
                None => report(format!("missing block '{}'", slot.name())),
            }
        }
        for block in node.blocks().keys() {
            if !descriptor.block_slots().iter().any(|slot| slot.name() == block) {
                report(format!("block '{block}' is not declared by this kind"));
            }
        }
    }

    issues
}
