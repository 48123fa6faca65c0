//! Batch dispatch
//!
//! The dispatcher ties the pipeline together: capture the ambient context
//! once, package every item against it, fan the units out across the
//! worker pool, then normalize the outcome through the resolver and report
//! failures through the aggregator before re-raising them.

pub mod failure;
pub mod resolve;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DispatcherConfig, ExecutionMode};
use crate::context::registry::BindingRegistry;
use crate::context::registry::InMemoryBindingRegistry;
use crate::context::request::RequestContext;
use crate::context::snapshot::SnapshotBuilder;
use crate::error::DispatchError;
use crate::package::{ItemPackager, PackagedUnit, WorkItem};
use crate::pool::{BatchOutcome, TokioWorkerPool, WorkerPool};
use crate::task::{TaskRef, TaskRegistry, WorkValue};
use crate::worker::bootstrap::{LocalBootstrap, RuntimeBootstrap};
use crate::worker::entry::WorkerEntry;

pub use failure::{log_failures, FailureDetail, FailureKind, MultiFailure, TaskFailure};
pub use resolve::{resolve, ResolverFn, ResultMapping};

/// Parallel-map dispatcher over a worker pool.
pub struct Dispatcher {
    config: DispatcherConfig,
    pool: Arc<dyn WorkerPool>,
    bootstrap: Arc<dyn RuntimeBootstrap>,
    tasks: Arc<dyn TaskRegistry>,
    bindings: Arc<dyn BindingRegistry>,
    request: RequestContext,
    variables: Vec<(String, WorkValue)>,
}

impl Dispatcher {
    pub fn builder(tasks: Arc<dyn TaskRegistry>) -> DispatcherBuilder {
        DispatcherBuilder::new(tasks)
    }

    /// Run every item through the handler and reassemble outcomes in input
    /// key order.
    ///
    /// The resolver callback always runs once per invocation. On pool
    /// failure the batch's reasons are logged, the resolver still receives
    /// the key-complete placeholder mapping, and the failure is re-raised
    /// with that mapping attached.
    pub async fn execute(
        &self,
        items: Vec<WorkItem>,
        handler: Option<TaskRef>,
        resolver: Option<ResolverFn>,
    ) -> Result<ResultMapping, DispatchError> {
        let job_id = Uuid::new_v4();
        let keys: Vec<String> = items.iter().map(|item| item.key.clone()).collect();

        if items.is_empty() {
            return Ok(resolve(&keys, None, None, resolver.as_ref()));
        }

        let snapshot = SnapshotBuilder::new(Arc::clone(&self.bindings), self.request.clone())
            .deny_list(self.config.deny_list.clone())
            .capture_variables(self.variables.clone())
            .build()?;
        let units = ItemPackager::package(&items, snapshot)?;
        let entry = Arc::new(WorkerEntry::new(
            Arc::clone(&self.bootstrap),
            Arc::clone(&self.tasks),
            handler,
            self.config.retry.clone(),
        ));

        info!(
            %job_id,
            items = units.len(),
            mode = ?self.config.mode,
            max_parallel = self.config.max_parallel,
            "dispatching batch"
        );

        match self.config.mode {
            ExecutionMode::Synchronous => self.execute_sync(&units, &entry, &keys, resolver),
            ExecutionMode::Parallel => {
                match self.pool.run(units, entry).await {
                    BatchOutcome::Completed(raw) => {
                        info!(%job_id, "batch completed");
                        Ok(resolve(&keys, Some(raw), None, resolver.as_ref()))
                    }
                    BatchOutcome::Failed { partial, failure } => {
                        warn!(%job_id, failed = failure.len(), "batch failed");
                        log_failures(&failure);
                        // The resolver runs even on failure before the
                        // re-raise.
                        let results =
                            resolve(&keys, partial, Some(&failure), resolver.as_ref());
                        Err(DispatchError::Pool { failure, results })
                    }
                }
            }
        }
    }

    /// In-process fallback: full serialize/restore round trip per item, in
    /// key order, first failure propagated immediately without aggregation.
    fn execute_sync(
        &self,
        units: &[PackagedUnit],
        entry: &WorkerEntry,
        keys: &[String],
        resolver: Option<ResolverFn>,
    ) -> Result<ResultMapping, DispatchError> {
        let mut raw = std::collections::HashMap::new();
        for unit in units {
            let value = entry
                .invoke(unit)
                .map_err(|source| DispatchError::Worker {
                    key: unit.key.clone(),
                    source,
                })?;
            raw.insert(unit.key.clone(), value);
        }
        Ok(resolve(keys, Some(raw), None, resolver.as_ref()))
    }
}

/// Builds a [`Dispatcher`], defaulting the pool, bootstrap, and ambient
/// registry when the host does not supply its own.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    pool: Option<Arc<dyn WorkerPool>>,
    bootstrap: Option<Arc<dyn RuntimeBootstrap>>,
    tasks: Arc<dyn TaskRegistry>,
    bindings: Option<Arc<dyn BindingRegistry>>,
    request: RequestContext,
    variables: Vec<(String, WorkValue)>,
}

impl DispatcherBuilder {
    pub fn new(tasks: Arc<dyn TaskRegistry>) -> Self {
        Self {
            config: DispatcherConfig::default(),
            pool: None,
            bootstrap: None,
            tasks,
            bindings: None,
            request: RequestContext::default(),
            variables: Vec::new(),
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn bootstrap(mut self, bootstrap: Arc<dyn RuntimeBootstrap>) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// The caller's ambient binding registry, enumerated at snapshot time.
    pub fn bindings(mut self, bindings: Arc<dyn BindingRegistry>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    /// Capture an ambient variable into every batch's snapshot.
    pub fn capture_variable(mut self, name: impl Into<String>, value: WorkValue) -> Self {
        self.variables.push((name.into(), value));
        self
    }

    pub fn build(self) -> Dispatcher {
        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(TokioWorkerPool::new(self.config.max_parallel)));
        Dispatcher {
            pool,
            bootstrap: self
                .bootstrap
                .unwrap_or_else(|| Arc::new(LocalBootstrap::new())),
            tasks: self.tasks,
            bindings: self
                .bindings
                .unwrap_or_else(|| Arc::new(InMemoryBindingRegistry::new())),
            request: self.request,
            variables: self.variables,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::task::{StaticTaskRegistry, TaskArgs};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn upper_registry() -> Arc<StaticTaskRegistry> {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("upper", |args: TaskArgs<'_>| {
            let value = args
                .call_data(0)
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!(value.to_uppercase()))
        });
        tasks.register("fail", |_args: TaskArgs<'_>| -> Result<Value, TaskError> {
            Err(TaskError::new("testing"))
        });
        Arc::new(tasks)
    }

    fn items(values: &[&str]) -> Vec<WorkItem> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| WorkItem::new(i.to_string(), WorkValue::data(json!(v))))
            .collect()
    }

    struct CountingPool {
        inner: TokioWorkerPool,
        calls: AtomicU32,
    }

    impl CountingPool {
        fn new() -> Self {
            Self {
                inner: TokioWorkerPool::new(4),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkerPool for CountingPool {
        async fn run(&self, units: Vec<PackagedUnit>, entry: Arc<WorkerEntry>) -> BatchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.run(units, entry).await
        }
    }

    #[tokio::test]
    async fn empty_input_returns_empty_without_invoking_pool() {
        let pool = Arc::new(CountingPool::new());
        let dispatcher = Dispatcher::builder(upper_registry())
            .pool(pool.clone())
            .build();

        let results = dispatcher.execute(Vec::new(), None, None).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(pool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolver_runs_exactly_once_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_resolver = Arc::clone(&calls);
        let resolver: ResolverFn = Box::new(move |mapping, _failure| {
            calls_in_resolver.fetch_add(1, Ordering::SeqCst);
            mapping
        });

        let dispatcher = Dispatcher::builder(upper_registry()).build();
        let results = dispatcher
            .execute(items(&["a", "b"]), Some(TaskRef::new("upper")), Some(resolver))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.outcome("0"), Some(&Some(json!("A"))));
        assert_eq!(results.outcome("1"), Some(&Some(json!("B"))));
    }

    #[tokio::test]
    async fn pool_failure_runs_resolver_then_reraises_with_results() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_resolver = Arc::clone(&seen);
        let resolver: ResolverFn = Box::new(move |mapping, failure| {
            *seen_in_resolver
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((
                mapping.clone(),
                failure.and_then(|f| f.first_original_message().map(str::to_string)),
            ));
            mapping
        });

        let dispatcher = Dispatcher::builder(upper_registry()).build();
        let err = dispatcher
            .execute(items(&["Hello", "World"]), Some(TaskRef::new("fail")), Some(resolver))
            .await
            .unwrap_err();

        let (mapping, message) = seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .expect("resolver should have run");
        assert_eq!(mapping.len(), 2);
        assert!(mapping.iter().all(|(_, value)| value.is_none()));
        assert_eq!(message.as_deref(), Some("testing"));

        match err {
            DispatchError::Pool { failure, results } => {
                assert_eq!(failure.len(), 2);
                assert_eq!(results.len(), 2);
            }
            other => panic!("expected pool failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn synchronous_mode_matches_parallel_results() {
        let dispatcher = Dispatcher::builder(upper_registry())
            .config(DispatcherConfig::synchronous())
            .build();
        let results = dispatcher
            .execute(items(&["x", "y"]), Some(TaskRef::new("upper")), None)
            .await
            .unwrap();
        assert_eq!(results.outcome("0"), Some(&Some(json!("X"))));
        assert_eq!(results.outcome("1"), Some(&Some(json!("Y"))));
    }

    #[tokio::test]
    async fn synchronous_mode_propagates_first_failure_immediately() {
        let dispatcher = Dispatcher::builder(upper_registry())
            .config(DispatcherConfig::synchronous())
            .build();
        let err = dispatcher
            .execute(items(&["a", "b"]), Some(TaskRef::new("fail")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Worker { key, .. } if key == "0"));
    }
}
