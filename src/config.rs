//! Dispatcher configuration
//!
//! Execution mode, parallelism bound, transient-retry policy, and the
//! deny-list of binding names excluded from context capture. All knobs are
//! serde-deserializable so hosts can embed them in their own config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::snapshot::DEFAULT_DENY_LIST;

/// How the dispatcher runs a batch.
///
/// Chosen at construction, never through process-wide state. The
/// synchronous mode exists for deterministic testing and still performs the
/// full serialize/restore round trip per item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Concurrent execution across the worker pool.
    #[default]
    Parallel,
    /// In-process, in-key-order execution; first failure propagates
    /// immediately without aggregation.
    Synchronous,
}

/// Retry policy for transient runtime-construction failures.
///
/// The backoff is fixed, matching the documented policy; both knobs are
/// tunable for hosts under heavier cache contention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total construction attempts before the failure propagates.
    pub max_attempts: u32,
    /// Delay between attempts.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Configuration for a [`Dispatcher`](crate::dispatch::Dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Execution mode for every batch this dispatcher runs.
    pub mode: ExecutionMode,
    /// Maximum number of concurrently running workers.
    pub max_parallel: usize,
    /// Retry policy applied inside each worker's bootstrap step.
    pub retry: RetryPolicy,
    /// Binding names never captured into the context snapshot.
    pub deny_list: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_parallel: 10,
            retry: RetryPolicy::default(),
            deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DispatcherConfig {
    /// Synchronous-mode configuration for deterministic tests.
    pub fn synchronous() -> Self {
        Self {
            mode: ExecutionMode::Synchronous,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the default deny-list entirely.
    pub fn with_deny_list<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_list = names.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = DispatcherConfig::default();
        assert_eq!(config.mode, ExecutionMode::Parallel);
        assert_eq!(config.max_parallel, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Duration::from_millis(100));
        assert!(config.deny_list.contains(&"db.connection".to_string()));
    }

    #[test]
    fn deserializes_with_humantime_backoff() {
        let config: DispatcherConfig = serde_json::from_str(
            r#"{
                "mode": "synchronous",
                "max_parallel": 4,
                "retry": { "max_attempts": 5, "backoff": "250ms" }
            }"#,
        )
        .expect("config should parse");
        assert_eq!(config.mode, ExecutionMode::Synchronous);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.retry.backoff, Duration::from_millis(250));
        // deny_list falls back to the default list
        assert!(!config.deny_list.is_empty());
    }

    #[test]
    fn deny_list_override_replaces_defaults() {
        let config = DispatcherConfig::default().with_deny_list(["secrets.vault"]);
        assert_eq!(config.deny_list, vec!["secrets.vault".to_string()]);
    }
}
