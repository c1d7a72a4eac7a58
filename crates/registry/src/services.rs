//! Type-keyed service locator handed to command factories.
//!
//! Hosts register device collaborators (pointer, keyboard, screen, ...) once;
//! descriptors fetch what they need while creating commands and fail with
//! [`CommandError::MissingService`] when a collaborator is absent.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use stepflow_types::CommandError;

#[derive(Clone, Default)]
pub struct Services {
    entries: HashMap<TypeId, ServiceEntry>,
}

#[derive(Clone)]
struct ServiceEntry {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its type, replacing any previous registration.
    ///
    /// Trait objects are registered by their trait type:
    /// `services.insert::<dyn PointerDevice>(Arc::new(device))`.
    pub fn insert<T>(&mut self, service: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.insert(
            TypeId::of::<T>(),
            ServiceEntry {
                name: type_name::<T>(),
                value: Arc::new(service),
            },
        );
        self
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Like [`Services::get`], but reports a missing service as a command error.
    pub fn require<T>(&self) -> Result<Arc<T>, CommandError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>().ok_or(CommandError::MissingService { service: type_name::<T>() })
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.values().map(|entry| entry.name).collect();
        names.sort_unstable();
        f.debug_struct("Services").field("registered", &names).finish()
    }
}
