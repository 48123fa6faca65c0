//! Tokio-backed worker pool
//!
//! Bounded fan-out over blocking worker bodies: a semaphore caps in-flight
//! workers, each unit runs on the blocking thread pool, and completions are
//! collected out of order. Worker panics are captured and surfaced as
//! failure reasons rather than tearing down the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::dispatch::failure::{MultiFailure, TaskFailure};
use crate::package::PackagedUnit;
use crate::pool::{BatchOutcome, WorkerPool};
use crate::worker::entry::WorkerEntry;

/// Default worker pool: tokio blocking tasks with bounded concurrency.
pub struct TokioWorkerPool {
    max_parallel: usize,
}

impl TokioWorkerPool {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    async fn run(&self, units: Vec<PackagedUnit>, entry: Arc<WorkerEntry>) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut futures = FuturesUnordered::new();

        info!(
            units = units.len(),
            max_parallel = self.max_parallel,
            "submitting batch to worker pool"
        );

        for unit in units {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let entry = Arc::clone(&entry);

            futures.push(tokio::spawn(async move {
                let _permit = permit;
                let key = unit.key.clone();
                let started = Instant::now();
                let joined = tokio::task::spawn_blocking(move || entry.invoke(&unit)).await;
                let elapsed = started.elapsed();
                let outcome = match joined {
                    Ok(result) => {
                        result.map_err(|err| TaskFailure::from_worker_error(&key, &err, elapsed))
                    }
                    Err(join_err) => Err(TaskFailure::from_panic(&key, &join_err, elapsed)),
                };
                (key, outcome)
            }));
        }

        let mut results = HashMap::new();
        let mut failure = MultiFailure::default();

        while let Some(joined) = futures.next().await {
            match joined {
                Ok((key, Ok(value))) => {
                    results.insert(key, value);
                }
                Ok((key, Err(task_failure))) => {
                    warn!(%key, "worker failed");
                    failure.push(task_failure);
                }
                Err(join_err) => {
                    // The outer task only awaits; a panic here is unexpected.
                    warn!(error = %join_err, "batch collection task failed");
                    failure.push(TaskFailure::collection_failure(&join_err));
                }
            }
        }

        if failure.is_empty() {
            BatchOutcome::Completed(results)
        } else {
            BatchOutcome::Failed {
                partial: if results.is_empty() {
                    None
                } else {
                    Some(results)
                },
                failure,
            }
        }
    }
}
