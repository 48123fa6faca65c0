//! Structured error types for dispatch operations
//!
//! Provides per-stage error categorization with source chains, plus the
//! transient/fatal split the worker entry point relies on for retries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::failure::MultiFailure;
use crate::dispatch::resolve::ResultMapping;

/// Failure raised by a task function, or attached to one by its author.
///
/// Carries an optional numeric code so host-defined error codes survive the
/// worker boundary; most Rust-side failures leave it unset.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

/// Errors from capturing the ambient context into a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to serialize context snapshot")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from packaging work items into transportable units.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("duplicate item key `{key}`")]
    DuplicateKey { key: String },

    #[error("failed to serialize item `{key}`")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from constructing a fresh worker runtime.
///
/// The transient class covers filesystem races between sibling workers
/// warming the same runtime cache; the entry point retries those.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("transient runtime construction failure: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("runtime construction failed: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl BootstrapError {
    /// Classify an I/O failure from runtime-cache access. `NotFound` and
    /// `PermissionDenied` show up when a sibling worker is mid-write to the
    /// shared cache, so those are retryable.
    pub fn from_io(message: impl Into<String>, source: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match source.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => Self::Transient {
                message: message.into(),
                source: Some(source),
            },
            _ => Self::Fatal {
                message: message.into(),
                source: Some(source),
            },
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors from resolving or invoking a binding inside a worker.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("binding `{name}` is not installed")]
    NotBound { name: String },

    #[error("binding `{name}` rejected: {reason}")]
    Rejected { name: String, reason: String },

    #[error("binding `{name}` factory references unknown task `{id}`")]
    UnknownFactory { name: String, id: String },

    #[error("binding `{name}` factory failed")]
    Factory {
        name: String,
        #[source]
        source: TaskError,
    },
}

/// Errors raised inside the worker entry point.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("runtime bootstrap failed after {attempts} attempt(s)")]
    Bootstrap {
        attempts: u32,
        #[source]
        source: BootstrapError,
    },

    #[error("failed to decode packaged unit for key `{key}`")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown task `{id}`")]
    UnknownTask { id: String },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("no handler supplied and item for key `{key}` is not self-executing")]
    NoHandler { key: String },
}

/// Top-level errors returned by [`Dispatcher::execute`](crate::dispatch::Dispatcher::execute).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker pool reported at least one failed worker. The resolved,
    /// key-complete placeholder mapping rides along so callers keep
    /// visibility into partial success.
    #[error("parallel batch failed: {failure}")]
    Pool {
        failure: MultiFailure,
        results: ResultMapping,
    },

    /// First failure out of the synchronous fallback mode, propagated
    /// immediately without aggregation.
    #[error("worker failed for key `{key}`")]
    Worker {
        key: String,
        #[source]
        source: WorkerError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Render an error and its source chain on one line, innermost last.
///
/// Stands in for a stack trace when a failure crosses the worker boundary.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_classifies_as_transient() {
        let err = BootstrapError::from_io(
            "cache read",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn io_permission_denied_classifies_as_transient() {
        let err = BootstrapError::from_io(
            "cache write",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn other_io_errors_classify_as_fatal() {
        let err = BootstrapError::from_io(
            "cache read",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt"),
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn error_chain_renders_sources_innermost_last() {
        let err = WorkerError::Bootstrap {
            attempts: 3,
            source: BootstrapError::transient("cache busy"),
        };
        let chain = error_chain(&err);
        assert!(chain.starts_with("runtime bootstrap failed after 3 attempt(s)"));
        assert!(chain.ends_with("transient runtime construction failure: cache busy"));
    }

    #[test]
    fn task_error_carries_optional_code() {
        let coded = TaskError::with_code("boom", 42);
        assert_eq!(coded.code, Some(42));
        assert_eq!(coded.to_string(), "boom");
        assert_eq!(TaskError::new("plain").code, None);
    }
}
