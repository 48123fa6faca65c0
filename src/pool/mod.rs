//! Worker pool boundary
//!
//! Process-pool scheduling internals are an external concern; the engine
//! only needs to hand a pool an ordered set of transportable units plus one
//! entry point, and pull back either a complete result set or a
//! multi-failure with whatever partial results arrived. The in-tree
//! [`TokioWorkerPool`] honors that contract with bounded task-level
//! concurrency; a process-backed pool drops in behind the same trait.

pub mod tokio_pool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::failure::MultiFailure;
use crate::package::PackagedUnit;
use crate::worker::entry::WorkerEntry;

pub use tokio_pool::TokioWorkerPool;

/// Aggregate outcome of one dispatched batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every worker completed; results keyed by item key.
    Completed(HashMap<String, Value>),
    /// At least one worker failed. The raw result set may be entirely
    /// absent when no worker completed.
    Failed {
        partial: Option<HashMap<String, Value>>,
        failure: MultiFailure,
    },
}

/// Executes packaged units concurrently in isolated workers.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Run every unit to completion and report the aggregate outcome.
    /// Workers may complete in any order; only key association is
    /// guaranteed.
    async fn run(&self, units: Vec<PackagedUnit>, entry: Arc<WorkerEntry>) -> BatchOutcome;
}
