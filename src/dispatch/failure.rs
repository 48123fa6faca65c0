//! Failure aggregation
//!
//! A failed batch surfaces as one [`MultiFailure`] holding one
//! [`TaskFailure`] per failed worker. When the true failure originated
//! inside the worker, the wrapper carries the original kind, code, message,
//! and trace so nothing is lost crossing the worker boundary. The
//! aggregator reports every reason through the tracing sink and never
//! raises.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::error::{error_chain, WorkerError};

/// Classification of a worker-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fresh-runtime construction failed.
    Bootstrap,
    /// The packaged unit could not be decoded.
    Decode,
    /// A task reference could not be restored.
    Restore,
    /// The handler (or self-executing item) raised.
    Handler,
    /// The worker panicked.
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrap => "bootstrap",
            Self::Decode => "decode",
            Self::Restore => "restore",
            Self::Handler => "handler",
            Self::Panic => "panic",
        };
        f.write_str(name)
    }
}

/// Structured descriptor for the failure as it happened inside the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Rendered source chain, innermost last; stands in for a stack trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub at: DateTime<Utc>,
}

/// Boundary-crossing wrapper around one failed worker invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Key of the item the worker was processing.
    pub key: String,
    /// The wrapper's own message.
    pub message: String,
    pub duration_ms: u64,
    /// Present when the true failure originated inside the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<FailureDetail>,
}

impl TaskFailure {
    /// Wrap a worker error for transport, preserving its original
    /// kind/code/message/trace.
    pub fn from_worker_error(key: &str, err: &WorkerError, elapsed: Duration) -> Self {
        let (kind, code) = match err {
            WorkerError::Bootstrap { .. } => (FailureKind::Bootstrap, None),
            WorkerError::Decode { .. } => (FailureKind::Decode, None),
            WorkerError::UnknownTask { .. } => (FailureKind::Restore, None),
            WorkerError::Task(task_err) => (FailureKind::Handler, task_err.code),
            WorkerError::NoHandler { .. } => (FailureKind::Handler, None),
        };
        let trace = if std::error::Error::source(err).is_some() {
            Some(error_chain(err))
        } else {
            None
        };

        Self {
            key: key.to_string(),
            message: format!("worker for key `{key}` failed: {err}"),
            duration_ms: elapsed.as_millis() as u64,
            original: Some(FailureDetail {
                kind,
                message: err.to_string(),
                code,
                trace,
                at: Utc::now(),
            }),
        }
    }

    /// Wrap a worker panic. No original metadata survives a panic, so the
    /// wrapper's own fields are all there is to report.
    pub fn from_panic(key: &str, join_err: &tokio::task::JoinError, elapsed: Duration) -> Self {
        Self {
            key: key.to_string(),
            message: format!("worker for key `{key}` panicked: {join_err}"),
            duration_ms: elapsed.as_millis() as u64,
            original: None,
        }
    }

    /// Failure of the batch collection itself rather than any one worker.
    pub fn collection_failure(join_err: &tokio::task::JoinError) -> Self {
        Self {
            key: String::new(),
            message: format!("batch collection failed: {join_err}"),
            duration_ms: 0,
            original: None,
        }
    }
}

/// Aggregate failure for one dispatched batch, one reason per failed
/// worker.
#[derive(Debug, Clone, Default, PartialEq, Error, Serialize, Deserialize)]
#[error("{} worker(s) failed", .reasons.len())]
pub struct MultiFailure {
    reasons: Vec<TaskFailure>,
}

impl MultiFailure {
    pub fn push(&mut self, reason: TaskFailure) {
        self.reasons.push(reason);
    }

    pub fn reasons(&self) -> &[TaskFailure] {
        &self.reasons
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Original message of the first reason that carries one. This is
    /// usually the error the handler actually raised.
    pub fn first_original_message(&self) -> Option<&str> {
        self.reasons
            .iter()
            .find_map(|reason| reason.original.as_ref())
            .map(|detail| detail.message.as_str())
    }
}

/// Report every constituent reason of a batch failure through the tracing
/// sink. Side-effecting only; never raises.
pub fn log_failures(failure: &MultiFailure) {
    for reason in failure.reasons() {
        match &reason.original {
            Some(detail) => {
                let code = detail
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                error!(
                    key = %reason.key,
                    duration_ms = reason.duration_ms,
                    "{}({}): {}: {}",
                    detail.kind,
                    code,
                    detail.message,
                    detail.trace.as_deref().unwrap_or("<no trace>")
                );
            }
            None => {
                error!(
                    key = %reason.key,
                    duration_ms = reason.duration_ms,
                    "{}", reason.message
                );
            }
        }
    }
}
