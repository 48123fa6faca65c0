//! Transportable task model
//!
//! Executable values cross the worker boundary as [`TaskRef`]s: a function
//! identifier resolved against an injected [`TaskRegistry`] plus the
//! captured arguments the function closes over. Captured arguments are
//! themselves [`WorkValue`]s, so tasks nest recursively inside list and map
//! values and survive a serialize/restore round trip behaviorally intact.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TaskError, WorkerError};
use crate::worker::WorkerContext;

/// Signature of a registered task function.
pub type TaskFn = Arc<dyn Fn(TaskArgs<'_>) -> Result<Value, TaskError> + Send + Sync>;

/// Arguments handed to a task function at invocation time.
///
/// The ambient worker context is threaded in explicitly; there is no
/// process-wide request singleton for task code to reach for.
pub struct TaskArgs<'a> {
    /// Re-established ambient context of the dispatching caller.
    pub ctx: &'a WorkerContext,
    /// Captured values restored from the task reference, in capture order.
    pub captured: &'a [Restored],
    /// Positional call arguments supplied by the invoker.
    pub call: &'a [Restored],
}

impl TaskArgs<'_> {
    /// Plain-data view of a call argument, if present and data-valued.
    pub fn call_data(&self, index: usize) -> Option<&Value> {
        self.call.get(index).and_then(Restored::as_data)
    }

    /// Plain-data view of a captured value, if present and data-valued.
    pub fn captured_data(&self, index: usize) -> Option<&Value> {
        self.captured.get(index).and_then(Restored::as_data)
    }
}

/// Transportable reference to a registered function plus its captured
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Identifier resolved against the worker-side task registry.
    pub id: String,
    /// Captured arguments; may contain nested task references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub captured: Vec<WorkValue>,
}

impl TaskRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            captured: Vec::new(),
        }
    }

    pub fn with_captured(mut self, value: WorkValue) -> Self {
        self.captured.push(value);
        self
    }
}

/// A value that can cross the worker boundary.
///
/// `Task` is the executable marker: it tells both the packager and the
/// restorer that this value travels with its captured environment rather
/// than as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkValue {
    /// Plain transportable datum.
    Data(Value),
    /// Executable value.
    Task(TaskRef),
    /// Sequence; elements may themselves be executable.
    List(Vec<WorkValue>),
    /// Order-preserving mapping; values may themselves be executable.
    Map(Vec<(String, WorkValue)>),
}

impl WorkValue {
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data(value.into())
    }

    pub fn task(task: TaskRef) -> Self {
        Self::Task(task)
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }
}

impl From<Value> for WorkValue {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

/// Lookup of task functions by identifier.
///
/// Injected wherever tasks are restored; the dispatching side and every
/// worker must agree on the registered identifiers.
pub trait TaskRegistry: Send + Sync {
    fn resolve(&self, id: &str) -> Option<TaskFn>;
}

/// In-memory task registry.
#[derive(Default, Clone)]
pub struct StaticTaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl StaticTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under an identifier, replacing any previous
    /// registration.
    pub fn register<F>(&mut self, id: impl Into<String>, f: F)
    where
        F: Fn(TaskArgs<'_>) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.tasks.insert(id.into(), Arc::new(f));
    }
}

impl TaskRegistry for StaticTaskRegistry {
    fn resolve(&self, id: &str) -> Option<TaskFn> {
        self.tasks.get(id).cloned()
    }
}

impl fmt::Debug for StaticTaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A value restored on the worker side, task references resolved into
/// invocable form.
pub enum Restored {
    Data(Value),
    Task(RestoredTask),
    List(Vec<Restored>),
    Map(Vec<(String, Restored)>),
}

impl Restored {
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&RestoredTask> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    /// Convert back to plain data. Fails if the value contains a task
    /// anywhere in its structure.
    pub fn to_value(&self) -> Result<Value, TaskError> {
        match self {
            Self::Data(value) => Ok(value.clone()),
            Self::Task(task) => Err(TaskError::new(format!(
                "task `{}` is not representable as plain data",
                task.id
            ))),
            Self::List(items) => items
                .iter()
                .map(Restored::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(name, value)| value.to_value().map(|v| (name.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
        }
    }
}

impl fmt::Debug for Restored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Task(task) => f.debug_tuple("Task").field(&task.id).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
        }
    }
}

/// An invocable task with its captured environment restored.
pub struct RestoredTask {
    pub id: String,
    func: TaskFn,
    captured: Vec<Restored>,
}

impl std::fmt::Debug for RestoredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoredTask")
            .field("id", &self.id)
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl RestoredTask {
    /// Invoke the task against the given ambient context.
    pub fn call(&self, ctx: &WorkerContext, call: &[Restored]) -> Result<Value, TaskError> {
        (self.func)(TaskArgs {
            ctx,
            captured: &self.captured,
            call,
        })
    }

    pub fn captured(&self) -> &[Restored] {
        &self.captured
    }
}

/// Resolve a transported value into invocable form, recursively.
pub fn restore(value: &WorkValue, registry: &dyn TaskRegistry) -> Result<Restored, WorkerError> {
    match value {
        WorkValue::Data(data) => Ok(Restored::Data(data.clone())),
        WorkValue::Task(task) => restore_task(task, registry).map(Restored::Task),
        WorkValue::List(items) => items
            .iter()
            .map(|item| restore(item, registry))
            .collect::<Result<Vec<_>, _>>()
            .map(Restored::List),
        WorkValue::Map(entries) => entries
            .iter()
            .map(|(name, item)| restore(item, registry).map(|r| (name.clone(), r)))
            .collect::<Result<Vec<_>, _>>()
            .map(Restored::Map),
    }
}

/// Resolve a task reference into invocable form, restoring its captured
/// environment recursively.
pub fn restore_task(
    task: &TaskRef,
    registry: &dyn TaskRegistry,
) -> Result<RestoredTask, WorkerError> {
    let func = registry
        .resolve(&task.id)
        .ok_or_else(|| WorkerError::UnknownTask {
            id: task.id.clone(),
        })?;
    let captured = task
        .captured
        .iter()
        .map(|value| restore(value, registry))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RestoredTask {
        id: task.id.clone(),
        func,
        captured,
    })
}
