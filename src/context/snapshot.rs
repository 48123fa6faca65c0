//! Context snapshot capture
//!
//! Folds the caller's bindings, request state, and captured variables into
//! one serialized snapshot. Built at most once per dispatcher invocation —
//! the builder memoizes the serialized form so every packaged unit shares
//! the same instance.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::registry::{BindingRegistry, CapturedBinding, FactorySpec};
use crate::context::request::RequestContext;
use crate::error::SnapshotError;
use crate::task::WorkValue;

/// Binding names known to be non-transportable: connection- or
/// file-handle-backed services that cannot be rebuilt from a serialized
/// factory. Overridable through `DispatcherConfig::deny_list`.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "db.connection",
    "cache.store",
    "queue.connection",
    "fs.watcher",
    "log.writer",
];

/// Everything a worker needs to reconstruct the caller's environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Caller-captured variables, in capture order; values may contain
    /// nested tasks.
    pub captured_variables: Vec<(String, WorkValue)>,
    /// Transportable bindings, in registration order.
    pub bindings: Vec<CapturedBinding>,
    /// Ambient request state.
    pub request: RequestContext,
}

/// Builds and memoizes the per-invocation context snapshot.
pub struct SnapshotBuilder {
    bindings: Arc<dyn BindingRegistry>,
    request: RequestContext,
    variables: Vec<(String, WorkValue)>,
    deny_list: Vec<String>,
    cache: OnceCell<Arc<str>>,
}

impl SnapshotBuilder {
    pub fn new(bindings: Arc<dyn BindingRegistry>, request: RequestContext) -> Self {
        Self {
            bindings,
            request,
            variables: Vec::new(),
            deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
            cache: OnceCell::new(),
        }
    }

    /// Replace the deny-list of binding names skipped during capture.
    pub fn deny_list<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_list = names.into_iter().map(Into::into).collect();
        self
    }

    /// Capture an ambient variable for workers; the value may contain
    /// nested tasks.
    pub fn capture_variable(mut self, name: impl Into<String>, value: WorkValue) -> Self {
        self.variables.push((name.into(), value));
        self
    }

    /// Capture a batch of ambient variables, preserving their order.
    pub fn capture_variables(mut self, variables: Vec<(String, WorkValue)>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Capture the ambient state into a snapshot. A binding that cannot
    /// travel is dropped, never fatal: the worker's fresh runtime defaults
    /// stand in for it.
    pub fn capture(&self) -> ContextSnapshot {
        let mut bindings = Vec::new();
        for binding in self.bindings.list() {
            if self.deny_list.iter().any(|denied| denied == &binding.name) {
                debug!(name = %binding.name, "skipping deny-listed binding");
                continue;
            }
            match binding.factory {
                FactorySpec::Task(factory) => bindings.push(CapturedBinding {
                    name: binding.name,
                    factory,
                    shared: binding.shared,
                }),
                FactorySpec::Opaque => {
                    debug!(name = %binding.name, "skipping non-transportable binding");
                }
            }
        }

        ContextSnapshot {
            captured_variables: self.variables.clone(),
            bindings,
            request: self.request.clone(),
        }
    }

    /// Serialize the snapshot, capturing it first if this is the first
    /// call. Memoized: every later call returns the same instance.
    pub fn build(&self) -> Result<Arc<str>, SnapshotError> {
        self.cache
            .get_or_try_init(|| {
                let snapshot = self.capture();
                let serialized = serde_json::to_string(&snapshot)?;
                Ok(Arc::from(serialized.as_str()))
            })
            .map(Arc::clone)
    }
}
