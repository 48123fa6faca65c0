//! Worker entry point
//!
//! The function invoked inside each isolated worker. It consumes nothing
//! but the packaged unit's serialized fields: a fresh runtime is
//! constructed, the snapshot's bindings and request state are re-applied,
//! the item value is restored, and the handler runs against the rebuilt
//! context. Handler failures are not caught here; they propagate to the
//! pool's own collection mechanism.

use std::sync::Arc;
use std::thread;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::context::registry::Binding;
use crate::context::snapshot::ContextSnapshot;
use crate::error::WorkerError;
use crate::package::PackagedUnit;
use crate::task::{restore, restore_task, Restored, TaskRef, TaskRegistry};
use crate::worker::bootstrap::RuntimeBootstrap;
use crate::worker::runtime::{WorkerContext, WorkerRuntime};

/// Decodes packaged units and runs the handler inside a worker.
pub struct WorkerEntry {
    bootstrap: Arc<dyn RuntimeBootstrap>,
    tasks: Arc<dyn TaskRegistry>,
    handler: Option<TaskRef>,
    retry: RetryPolicy,
}

impl WorkerEntry {
    pub fn new(
        bootstrap: Arc<dyn RuntimeBootstrap>,
        tasks: Arc<dyn TaskRegistry>,
        handler: Option<TaskRef>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            bootstrap,
            tasks,
            handler,
            retry,
        }
    }

    /// Run one packaged unit to completion.
    pub fn invoke(&self, unit: &PackagedUnit) -> Result<Value, WorkerError> {
        let runtime = self.bootstrap_with_retry()?;

        let snapshot: ContextSnapshot =
            serde_json::from_str(&unit.snapshot).map_err(|source| WorkerError::Decode {
                key: unit.key.clone(),
                source,
            })?;

        let ctx = self.establish_context(runtime, snapshot, &unit.key)?;

        let value: crate::task::WorkValue =
            serde_json::from_str(&unit.value).map_err(|source| WorkerError::Decode {
                key: unit.key.clone(),
                source,
            })?;
        let restored = restore(&value, self.tasks.as_ref())?;

        match &self.handler {
            Some(handler) => {
                let handler = restore_task(handler, self.tasks.as_ref())?;
                let call = [restored, Restored::Data(Value::String(unit.key.clone()))];
                Ok(handler.call(&ctx, &call)?)
            }
            // Items that are themselves tasks handle themselves.
            None => match restored {
                Restored::Task(task) => Ok(task.call(&ctx, &[])?),
                _ => Err(WorkerError::NoHandler {
                    key: unit.key.clone(),
                }),
            },
        }
    }

    /// Construct a fresh runtime, retrying the transient filesystem-race
    /// class of failures at a fixed backoff.
    fn bootstrap_with_retry(&self) -> Result<WorkerRuntime, WorkerError> {
        let mut attempt = 1;
        loop {
            match self.bootstrap.build_runtime() {
                Ok(runtime) => return Ok(runtime),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        %err,
                        "transient runtime construction failure, retrying"
                    );
                    thread::sleep(self.retry.backoff);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(WorkerError::Bootstrap {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// Re-apply the snapshot onto a fresh runtime: bindings best-effort,
    /// request state field-by-field with resolver tasks unwrapped, captured
    /// variables restored recursively.
    fn establish_context(
        &self,
        runtime: WorkerRuntime,
        snapshot: ContextSnapshot,
        key: &str,
    ) -> Result<WorkerContext, WorkerError> {
        for captured in snapshot.bindings {
            let name = captured.name.clone();
            let binding = Binding::task(captured.name, captured.factory, captured.shared);
            if let Err(err) = runtime.bindings.install(binding) {
                // The fresh runtime's own defaults stand in for it.
                debug!(%name, %err, "skipping binding that failed to re-apply");
            }
        }

        let route_resolver = snapshot
            .request
            .route_resolver
            .as_ref()
            .map(|resolver| restore_task(resolver, self.tasks.as_ref()))
            .transpose()?;
        let user_resolver = snapshot
            .request
            .user_resolver
            .as_ref()
            .map(|resolver| restore_task(resolver, self.tasks.as_ref()))
            .transpose()?;

        let variables = snapshot
            .captured_variables
            .iter()
            .map(|(name, value)| {
                restore(value, self.tasks.as_ref()).map(|restored| (name.clone(), restored))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            %key,
            bindings = runtime.bindings.list().len(),
            variables = variables.len(),
            "worker context established"
        );

        Ok(WorkerContext::new(
            runtime,
            snapshot.request,
            route_resolver,
            user_resolver,
            variables,
            Arc::clone(&self.tasks),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::context::registry::{FactorySpec, InMemoryBindingRegistry};
    use crate::context::request::RequestContext;
    use crate::context::snapshot::SnapshotBuilder;
    use crate::error::BootstrapError;
    use crate::package::{ItemPackager, WorkItem};
    use crate::task::{StaticTaskRegistry, TaskArgs, WorkValue};
    use crate::worker::bootstrap::LocalBootstrap;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    fn package_one(value: WorkValue, request: RequestContext) -> PackagedUnit {
        let bindings = Arc::new(InMemoryBindingRegistry::new());
        let snapshot = SnapshotBuilder::new(bindings, request).build().unwrap();
        ItemPackager::package(&[WorkItem::new("k0", value)], snapshot)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn handler_receives_value_and_key() {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("echo_with_key", |args: TaskArgs<'_>| {
            let value = args.call_data(0).cloned().unwrap_or(Value::Null);
            let key = args.call_data(1).cloned().unwrap_or(Value::Null);
            Ok(json!({ "value": value, "key": key }))
        });

        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(tasks),
            Some(TaskRef::new("echo_with_key")),
            fast_retry(),
        );
        let unit = package_one(WorkValue::data(json!("Hello")), RequestContext::default());
        let result = entry.invoke(&unit).unwrap();
        assert_eq!(result, json!({ "value": "Hello", "key": "k0" }));
    }

    #[test]
    fn self_executing_item_runs_without_handler() {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("forty_two", |_args: TaskArgs<'_>| Ok(json!(42)));

        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(tasks),
            None,
            fast_retry(),
        );
        let unit = package_one(
            WorkValue::Task(TaskRef::new("forty_two")),
            RequestContext::default(),
        );
        assert_eq!(entry.invoke(&unit).unwrap(), json!(42));
    }

    #[test]
    fn plain_value_without_handler_is_an_error() {
        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(StaticTaskRegistry::new()),
            None,
            fast_retry(),
        );
        let unit = package_one(WorkValue::data(json!(1)), RequestContext::default());
        let err = entry.invoke(&unit).unwrap_err();
        assert!(matches!(err, WorkerError::NoHandler { key } if key == "k0"));
    }

    #[test]
    fn captured_bindings_are_reapplied_and_usable() {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("make_greeting", |_args: TaskArgs<'_>| Ok(json!("hello from binding")));
        tasks.register("use_binding", |args: TaskArgs<'_>| {
            args.ctx
                .make("greeting")
                .map_err(|err| crate::error::TaskError::new(err.to_string()))
        });

        let ambient = Arc::new(InMemoryBindingRegistry::new());
        ambient.bind(
            "greeting",
            FactorySpec::Task(TaskRef::new("make_greeting")),
            true,
        );
        let snapshot = SnapshotBuilder::new(ambient, RequestContext::default())
            .build()
            .unwrap();
        let unit = ItemPackager::package(
            &[WorkItem::new("k0", WorkValue::data(json!(null)))],
            snapshot,
        )
        .unwrap()
        .remove(0);

        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(tasks),
            Some(TaskRef::new("use_binding")),
            fast_retry(),
        );
        assert_eq!(entry.invoke(&unit).unwrap(), json!("hello from binding"));
    }

    #[test]
    fn request_state_and_resolvers_are_restored() {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("current_user", |_args: TaskArgs<'_>| {
            Ok(json!({ "id": 7, "name": "ada" }))
        });
        tasks.register("inspect_request", |args: TaskArgs<'_>| {
            let user = args
                .ctx
                .current_user()
                .transpose()?
                .unwrap_or(Value::Null);
            Ok(json!({ "locale": args.ctx.request.locale, "user": user }))
        });

        let request = RequestContext::new("POST", "/import")
            .with_locale("fr")
            .with_user_resolver(TaskRef::new("current_user"));
        let unit = package_one(WorkValue::data(json!(null)), request);

        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(tasks),
            Some(TaskRef::new("inspect_request")),
            fast_retry(),
        );
        let result = entry.invoke(&unit).unwrap();
        assert_eq!(result["locale"], json!("fr"));
        assert_eq!(result["user"]["name"], json!("ada"));
    }

    #[test]
    fn captured_variables_restore_including_nested_tasks() {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("double", |args: TaskArgs<'_>| {
            let n = args
                .call_data(0)
                .and_then(Value::as_i64)
                .unwrap_or_default();
            Ok(json!(n * 2))
        });
        tasks.register("use_variables", |args: TaskArgs<'_>| {
            let base = args
                .ctx
                .variable("base")
                .and_then(Restored::as_data)
                .and_then(Value::as_i64)
                .unwrap_or_default();
            let doubler = args
                .ctx
                .variable("ops")
                .and_then(|ops| match ops {
                    Restored::Map(entries) => entries
                        .iter()
                        .find(|(name, _)| name == "double")
                        .and_then(|(_, op)| op.as_task()),
                    _ => None,
                })
                .ok_or_else(|| crate::error::TaskError::new("missing doubler"))?;
            doubler.call(args.ctx, &[Restored::Data(json!(base))])
        });

        let ambient = Arc::new(InMemoryBindingRegistry::new());
        let snapshot = SnapshotBuilder::new(ambient, RequestContext::default())
            .capture_variable("base", WorkValue::data(json!(21)))
            .capture_variable(
                "ops",
                WorkValue::Map(vec![(
                    "double".to_string(),
                    WorkValue::Task(TaskRef::new("double")),
                )]),
            )
            .build()
            .unwrap();
        let unit = ItemPackager::package(
            &[WorkItem::new("k0", WorkValue::data(json!(null)))],
            snapshot,
        )
        .unwrap()
        .remove(0);

        let entry = WorkerEntry::new(
            Arc::new(LocalBootstrap::new()),
            Arc::new(tasks),
            Some(TaskRef::new("use_variables")),
            fast_retry(),
        );
        assert_eq!(entry.invoke(&unit).unwrap(), json!(42));
    }

    struct CountdownBootstrap {
        remaining_failures: AtomicU32,
        transient: bool,
    }

    impl CountdownBootstrap {
        fn new(failures: u32, transient: bool) -> Self {
            Self {
                remaining_failures: AtomicU32::new(failures),
                transient,
            }
        }
    }

    impl RuntimeBootstrap for CountdownBootstrap {
        fn build_runtime(&self) -> Result<WorkerRuntime, BootstrapError> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(WorkerRuntime::fresh());
            }
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            if self.transient {
                Err(BootstrapError::transient("cache busy"))
            } else {
                Err(BootstrapError::fatal("cache corrupt"))
            }
        }
    }

    fn entry_with_bootstrap(bootstrap: Arc<dyn RuntimeBootstrap>) -> WorkerEntry {
        let mut tasks = StaticTaskRegistry::new();
        tasks.register("noop", |_args: TaskArgs<'_>| Ok(json!("ok")));
        WorkerEntry::new(bootstrap, Arc::new(tasks), Some(TaskRef::new("noop")), fast_retry())
    }

    #[test]
    fn transient_bootstrap_failures_are_retried() {
        let entry = entry_with_bootstrap(Arc::new(CountdownBootstrap::new(2, true)));
        let unit = package_one(WorkValue::data(json!(null)), RequestContext::default());
        assert_eq!(entry.invoke(&unit).unwrap(), json!("ok"));
    }

    #[test]
    fn transient_failures_exhaust_after_max_attempts() {
        let entry = entry_with_bootstrap(Arc::new(CountdownBootstrap::new(10, true)));
        let unit = package_one(WorkValue::data(json!(null)), RequestContext::default());
        let err = entry.invoke(&unit).unwrap_err();
        assert!(matches!(err, WorkerError::Bootstrap { attempts: 3, .. }));
    }

    #[test]
    fn fatal_bootstrap_failures_are_not_retried() {
        let entry = entry_with_bootstrap(Arc::new(CountdownBootstrap::new(10, false)));
        let unit = package_one(WorkValue::data(json!(null)), RequestContext::default());
        let err = entry.invoke(&unit).unwrap_err();
        assert!(matches!(err, WorkerError::Bootstrap { attempts: 1, .. }));
    }
}
