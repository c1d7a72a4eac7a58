//! Whole-tree settings migration.

use std::fmt;

use stepflow_registry::CommandRegistry;
use stepflow_types::{CommandId, RegistryError, SettingsError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tree::{CommandTree, TreeError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A node whose settings could not be brought to the latest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub id: CommandId,
    pub kind: String,
    pub error: MigrationError,
}

impl fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.id, self.kind, self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Nodes whose settings were replaced, in pre-order.
    pub migrated: Vec<CommandId>,
    /// Nodes already at the latest version.
    pub unchanged: usize,
    pub failures: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Brings every node's settings to its kind's latest version.
///
/// Each node is migrated independently: a failure is recorded and the node
/// keeps its old settings, while the rest of the tree is still migrated.
pub fn migrate_tree(tree: &mut CommandTree, registry: &CommandRegistry) -> MigrationReport {
    let mut report = MigrationReport::default();

    for id in tree.preorder() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let kind = node.kind().to_string();
        let upgraded = registry
            .get(&kind)
            .map_err(MigrationError::from)
            .and_then(|descriptor| descriptor.migrate_to_latest(node.settings()).map_err(MigrationError::from));

        let already_latest = matches!(&upgraded, Ok(settings) if settings == node.settings());
        if already_latest {
            report.unchanged += 1;
            continue;
        }
        let result = upgraded.and_then(|settings| tree.replace_settings(id, settings).map_err(MigrationError::from));

        match result {
            Ok(previous) => {
                debug!(command_id = %id, kind = %kind, from_version = previous.version(), "settings migrated");
                report.migrated.push(id);
            }
            Err(error) => {
                warn!(command_id = %id, kind = %kind, error = %error, "settings migration failed");
                report.failures.push(MigrationFailure { id, kind, error });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stepflow_types::Settings;

    use super::*;
    use crate::{
        commands::{builtin_descriptors, control::WHILE_KIND, time::WAIT_KIND},
        config::EngineConfig,
        tree::Location,
    };

    fn registry() -> CommandRegistry {
        CommandRegistry::new(builtin_descriptors(&EngineConfig::default())).expect("registry")
    }

    #[test]
    fn migrates_nested_nodes_and_keeps_going_after_failures() {
        let registry = registry();
        let mut tree = CommandTree::new();
        let while_descriptor = registry.get(WHILE_KIND).expect("while").clone();
        let wait_descriptor = registry.get(WAIT_KIND).expect("wait").clone();

        let legacy_loop = Settings::from_value(WHILE_KIND, 1, json!({ "condition_expr": "true", "max_iterations": 2 })).expect("v1");
        let loop_id = tree
            .add_with_settings(while_descriptor.as_ref(), legacy_loop, &Location::Root, None)
            .expect("add loop");
        let broken = Settings::from_value(WAIT_KIND, 1, json!({ "milliseconds": "soon" })).expect("broken");
        let broken_id = tree
            .add_with_settings(wait_descriptor.as_ref(), broken, &Location::block(loop_id, "body"), None)
            .expect("add broken");
        let legacy_wait = Settings::from_value(WAIT_KIND, 1, json!({ "milliseconds": 20 })).expect("v1");
        let wait_id = tree
            .add_with_settings(wait_descriptor.as_ref(), legacy_wait, &Location::block(loop_id, "body"), None)
            .expect("add wait");
        tree.add(wait_descriptor.as_ref(), &Location::Root, None).expect("add current");

        let report = migrate_tree(&mut tree, &registry);

        assert_eq!(report.migrated, vec![loop_id, wait_id]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, broken_id);
        assert_eq!(tree.node(broken_id).expect("broken").settings().version(), 1);
        assert_eq!(tree.node(wait_id).expect("wait").settings().version(), 2);

        let second = migrate_tree(&mut tree, &registry);
        assert!(second.migrated.is_empty());
        assert_eq!(second.unchanged, 3);
    }
}
