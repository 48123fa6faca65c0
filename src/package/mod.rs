//! Item packaging
//!
//! Turns each keyed work item into one self-contained transportable unit:
//! the serialized value paired with its key and the shared, once-serialized
//! context snapshot. Packaging cost is O(items) plus a single snapshot
//! serialization, not O(items × snapshot size).

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PackageError;
use crate::task::WorkValue;

/// One (key, value) pair from the caller's input collection.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub value: WorkValue,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, value: WorkValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Transportable unit for one work item. Immutable after creation; owned by
/// the dispatcher until a worker consumes it. The snapshot field is shared
/// by reference across every unit of the batch.
#[derive(Debug, Clone)]
pub struct PackagedUnit {
    pub key: String,
    /// Serialized [`WorkValue`].
    pub value: String,
    /// Serialized [`ContextSnapshot`](crate::context::ContextSnapshot).
    pub snapshot: Arc<str>,
}

/// Packages work items against a shared snapshot.
pub struct ItemPackager;

impl ItemPackager {
    /// Serialize every item, pairing it with its key and the shared
    /// snapshot. Pure: caller state is never mutated. An empty input yields
    /// an empty unit collection. Duplicate keys violate the input contract
    /// and fail loud before any dispatch.
    pub fn package(
        items: &[WorkItem],
        snapshot: Arc<str>,
    ) -> Result<Vec<PackagedUnit>, PackageError> {
        let mut seen = HashSet::with_capacity(items.len());
        let mut units = Vec::with_capacity(items.len());

        for item in items {
            if !seen.insert(item.key.as_str()) {
                return Err(PackageError::DuplicateKey {
                    key: item.key.clone(),
                });
            }
            let value = serde_json::to_string(&item.value).map_err(|source| {
                PackageError::Serialize {
                    key: item.key.clone(),
                    source,
                }
            })?;
            units.push(PackagedUnit {
                key: item.key.clone(),
                value,
                snapshot: Arc::clone(&snapshot),
            });
        }

        Ok(units)
    }
}
