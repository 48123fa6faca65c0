//! Fresh worker runtime and re-established ambient context
//!
//! A [`WorkerRuntime`] is what the bootstrap boundary constructs: a blank
//! environment with its own binding registry. A [`WorkerContext`] layers
//! the restored snapshot on top — bindings re-applied, request state and
//! captured variables restored — and is threaded explicitly into every task
//! invocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::context::registry::{BindingRegistry, FactorySpec, InMemoryBindingRegistry};
use crate::context::request::RequestContext;
use crate::error::{BindingError, TaskError};
use crate::task::{restore_task, Restored, RestoredTask, StaticTaskRegistry, TaskRegistry};

/// A freshly constructed execution environment for one worker invocation.
pub struct WorkerRuntime {
    pub bindings: Box<dyn BindingRegistry>,
}

impl WorkerRuntime {
    /// Blank runtime backed by an empty in-memory registry.
    pub fn fresh() -> Self {
        Self {
            bindings: Box::new(InMemoryBindingRegistry::new()),
        }
    }
}

/// The caller's ambient context as re-established inside a worker.
///
/// Nothing here survives between invocations: each worker invocation gets a
/// fresh context rebuilt entirely from the packaged unit's snapshot.
pub struct WorkerContext {
    runtime: WorkerRuntime,
    /// Restored request state (data fields; resolvers live alongside).
    pub request: RequestContext,
    route_resolver: Option<RestoredTask>,
    user_resolver: Option<RestoredTask>,
    variables: Vec<(String, Restored)>,
    tasks: Arc<dyn TaskRegistry>,
    /// Memoized instances of shared bindings, per invocation.
    shared: Mutex<HashMap<String, Value>>,
}

impl WorkerContext {
    pub fn new(
        runtime: WorkerRuntime,
        request: RequestContext,
        route_resolver: Option<RestoredTask>,
        user_resolver: Option<RestoredTask>,
        variables: Vec<(String, Restored)>,
        tasks: Arc<dyn TaskRegistry>,
    ) -> Self {
        Self {
            runtime,
            request,
            route_resolver,
            user_resolver,
            variables,
            tasks,
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Bare context over a blank runtime; used when invoking restored tasks
    /// outside a dispatched worker.
    pub fn detached() -> Self {
        Self::new(
            WorkerRuntime::fresh(),
            RequestContext::default(),
            None,
            None,
            Vec::new(),
            Arc::new(StaticTaskRegistry::new()),
        )
    }

    /// A captured ambient variable, by name.
    pub fn variable(&self, name: &str) -> Option<&Restored> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Resolve a binding by invoking its factory. Shared bindings memoize
    /// their instance for the rest of this invocation.
    pub fn make(&self, name: &str) -> Result<Value, BindingError> {
        let binding = self
            .runtime
            .bindings
            .list()
            .into_iter()
            .find(|b| b.name == name)
            .ok_or_else(|| BindingError::NotBound {
                name: name.to_string(),
            })?;

        if binding.shared {
            let shared = self
                .shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(value) = shared.get(name) {
                return Ok(value.clone());
            }
        }

        let factory = match binding.factory {
            FactorySpec::Task(factory) => factory,
            FactorySpec::Opaque => {
                return Err(BindingError::Rejected {
                    name: name.to_string(),
                    reason: "factory is process-local".to_string(),
                })
            }
        };

        let task =
            restore_task(&factory, self.tasks.as_ref()).map_err(|_| BindingError::UnknownFactory {
                name: name.to_string(),
                id: factory.id.clone(),
            })?;
        let value = task.call(self, &[]).map_err(|source| BindingError::Factory {
            name: name.to_string(),
            source,
        })?;

        if binding.shared {
            self.shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(name.to_string(), value.clone());
        }

        Ok(value)
    }

    /// Invoke the restored route resolver, if the snapshot carried one.
    pub fn current_route(&self) -> Option<Result<Value, TaskError>> {
        self.route_resolver
            .as_ref()
            .map(|resolver| resolver.call(self, &[]))
    }

    /// Invoke the restored user resolver, if the snapshot carried one.
    pub fn current_user(&self) -> Option<Result<Value, TaskError>> {
        self.user_resolver
            .as_ref()
            .map(|resolver| resolver.call(self, &[]))
    }

    pub fn bindings(&self) -> &dyn BindingRegistry {
        self.runtime.bindings.as_ref()
    }
}
