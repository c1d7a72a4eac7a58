use std::{collections::HashSet, fmt, sync::Arc};

use indexmap::IndexMap;
use stepflow_types::{InvalidBlockSlot, RegistryError};
use tracing::debug;

use crate::descriptor::CommandDescriptor;

/// Catalog of every installed command kind.
///
/// Built once from the full set of descriptors and read-only afterwards.
/// Registration order is preserved, so [`CommandRegistry::all`] lists kinds
/// the same way on every run.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    descriptors: IndexMap<String, Arc<dyn CommandDescriptor>>,
}

impl CommandRegistry {
    /// Builds a registry from the installed descriptors.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::DuplicateDescriptor`] when two descriptors share a kind
    /// - [`RegistryError::EmptyKind`] when a descriptor has a blank kind
    /// - [`RegistryError::PaddedKind`] when a kind has surrounding whitespace
    /// - [`RegistryError::InvalidBlockSlot`] when a descriptor declares a blank
    ///   or duplicated slot name
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let registry = CommandRegistry::new(stepflow_engine::commands::builtin_descriptors())?;
    /// let wait = registry.get("time.wait")?;
    /// assert_eq!(wait.latest_settings_version(), 2);
    /// ```
    pub fn new<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn CommandDescriptor>>,
    {
        let mut registered: IndexMap<String, Arc<dyn CommandDescriptor>> = IndexMap::new();
        for descriptor in descriptors {
            let kind = descriptor.kind().to_string();
            if kind.trim().is_empty() {
                return Err(RegistryError::EmptyKind {
                    display_name: descriptor.display_name().to_string(),
                });
            }
            if kind.trim() != kind {
                return Err(RegistryError::PaddedKind { kind });
            }
            check_block_slots(&kind, descriptor.as_ref())?;
            if registered.contains_key(&kind) {
                return Err(RegistryError::DuplicateDescriptor { kind });
            }
            registered.insert(kind, descriptor);
        }
        debug!(kinds = registered.len(), "command registry built");
        Ok(Self { descriptors: registered })
    }

    /// Every descriptor in registration order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn CommandDescriptor>> {
        self.descriptors.values()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Looks up a descriptor, treating an unknown kind as a configuration error.
    pub fn get(&self, kind: &str) -> Result<&Arc<dyn CommandDescriptor>, RegistryError> {
        self.try_get(kind).ok_or_else(|| RegistryError::DescriptorNotFound { kind: kind.to_string() })
    }

    pub fn try_get(&self, kind: &str) -> Option<&Arc<dyn CommandDescriptor>> {
        self.descriptors.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.descriptors.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("kinds", &self.descriptors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_block_slots(kind: &str, descriptor: &dyn CommandDescriptor) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for slot in descriptor.block_slots() {
        let invalid = |reason: String| RegistryError::InvalidBlockSlot {
            kind: kind.to_string(),
            source: InvalidBlockSlot {
                slot: slot.name().to_string(),
                reason,
            },
        };
        if slot.name().trim().is_empty() {
            return Err(invalid("slot name cannot be empty".into()));
        }
        if let Some(max) = slot.max()
            && max < slot.min()
        {
            return Err(invalid(format!("max ({max}) is smaller than min ({})", slot.min())));
        }
        if !seen.insert(slot.name()) {
            return Err(invalid("slot name is declared more than once".into()));
        }
    }
    Ok(())
}
