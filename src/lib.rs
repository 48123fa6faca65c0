//! # Fanout
//!
//! A parallel-map execution engine: given a keyed collection of items,
//! dispatch a handler against each item concurrently across isolated
//! workers, then reassemble results in the original key order, tolerating
//! and reporting partial failures without losing which keys failed.
//!
//! Everything crossing the worker boundary is serialized: each item is
//! packaged with a once-captured snapshot of the caller's ambient context
//! (service bindings, request state, captured variables), and each worker
//! rebuilds that context from scratch before invoking the handler.
//!
//! ## Modules
//!
//! - `config` - Execution mode, parallelism bound, retry policy, deny-list
//! - `context` - Ambient context capture: bindings, request state, snapshots
//! - `dispatch` - The dispatcher, resolver/placeholder logic, failure aggregation
//! - `error` - Structured error types for every pipeline stage
//! - `package` - Work items and transportable packaged units
//! - `pool` - Worker pool boundary and the tokio-backed default pool
//! - `task` - Transportable task model and the task registry
//! - `worker` - Worker-side bootstrap, runtime context, and entry point

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod package;
pub mod pool;
pub mod task;
pub mod worker;

pub use config::{DispatcherConfig, ExecutionMode, RetryPolicy};
pub use context::{
    Binding, BindingRegistry, ContextSnapshot, FactorySpec, InMemoryBindingRegistry,
    RequestContext, SnapshotBuilder, DEFAULT_DENY_LIST,
};
pub use dispatch::{
    Dispatcher, DispatcherBuilder, FailureDetail, FailureKind, MultiFailure, ResolverFn,
    ResultMapping, TaskFailure,
};
pub use error::{BootstrapError, DispatchError, PackageError, SnapshotError, TaskError, WorkerError};
pub use package::{ItemPackager, PackagedUnit, WorkItem};
pub use pool::{BatchOutcome, TokioWorkerPool, WorkerPool};
pub use task::{
    Restored, RestoredTask, StaticTaskRegistry, TaskArgs, TaskFn, TaskRef, TaskRegistry, WorkValue,
};
pub use worker::{LocalBootstrap, RuntimeBootstrap, WorkerContext, WorkerEntry, WorkerRuntime};
