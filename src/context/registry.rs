//! Binding enumeration and installation boundary
//!
//! The host's dependency-injection container is an external collaborator;
//! this module pins down the two operations the engine needs from it —
//! list all current bindings, install a binding best-effort — and ships an
//! in-memory implementation used as the default and inside fresh worker
//! runtimes.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::BindingError;
use crate::task::TaskRef;

/// How a binding's value is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorySpec {
    /// Factory expressible as a transportable task reference.
    Task(TaskRef),
    /// Process-local factory (connection- or handle-backed); cannot travel
    /// and is silently omitted from snapshots.
    Opaque,
}

/// One service binding held by a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub factory: FactorySpec,
    /// Shared bindings resolve once per worker and memoize the instance.
    pub shared: bool,
}

impl Binding {
    pub fn task(name: impl Into<String>, factory: TaskRef, shared: bool) -> Self {
        Self {
            name: name.into(),
            factory: FactorySpec::Task(factory),
            shared,
        }
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: FactorySpec::Opaque,
            shared: false,
        }
    }
}

/// Captured, transportable form of a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedBinding {
    pub name: String,
    pub factory: TaskRef,
    pub shared: bool,
}

/// Enumeration and installation surface of a DI container.
pub trait BindingRegistry: Send + Sync {
    /// Every binding the registry currently holds, in registration order.
    fn list(&self) -> Vec<Binding>;

    /// Install a binding, replacing any existing binding of the same name.
    /// Best-effort: implementations may reject bindings they cannot hold.
    fn install(&self, binding: Binding) -> Result<(), BindingError>;
}

/// Order-preserving in-memory binding registry.
#[derive(Debug, Default)]
pub struct InMemoryBindingRegistry {
    bindings: Mutex<Vec<Binding>>,
}

impl InMemoryBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience registration used when standing up an ambient registry.
    pub fn bind(&self, name: impl Into<String>, factory: FactorySpec, shared: bool) {
        let binding = Binding {
            name: name.into(),
            factory,
            shared,
        };
        let mut bindings = self
            .bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match bindings.iter_mut().find(|b| b.name == binding.name) {
            Some(existing) => *existing = binding,
            None => bindings.push(binding),
        }
    }
}

impl BindingRegistry for InMemoryBindingRegistry {
    fn list(&self) -> Vec<Binding> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn install(&self, binding: Binding) -> Result<(), BindingError> {
        self.bind(binding.name, binding.factory, binding.shared);
        Ok(())
    }
}
