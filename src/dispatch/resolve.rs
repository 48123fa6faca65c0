//! Result normalization and placeholder logic
//!
//! Whatever the pool reports — complete results, partial results, or
//! nothing at all — the resolver hands back a mapping whose key set equals
//! the original input's, with `None` standing in for every key that never
//! produced a value. A user-supplied post-processing callback may then
//! substitute its own mapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::failure::MultiFailure;

/// User-supplied post-processing callback, given the placeholder-overlaid
/// results and the batch failure, if any.
pub type ResolverFn =
    Box<dyn Fn(ResultMapping, Option<&MultiFailure>) -> ResultMapping + Send + Sync>;

/// Ordered mapping from item key to outcome; `None` is the null
/// placeholder for a key whose worker never produced a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMapping {
    entries: Vec<(String, Option<Value>)>,
}

impl ResultMapping {
    /// Mapping with every key present and no values: the shape the
    /// resolver starts from.
    pub fn placeholders<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: keys.into_iter().map(|key| (key.into(), None)).collect(),
        }
    }

    /// Overlay raw results onto the mapping: raw entries win where keys
    /// match, unknown keys append at the end.
    pub fn overlay(&mut self, raw: HashMap<String, Value>) {
        let mut raw = raw;
        for (key, slot) in &mut self.entries {
            if let Some(value) = raw.remove(key.as_str()) {
                *slot = Some(value);
            }
        }
        let mut extra: Vec<(String, Option<Value>)> =
            raw.into_iter().map(|(k, v)| (k, Some(v))).collect();
        extra.sort_by(|(a, _), (b, _)| a.cmp(b));
        self.entries.extend(extra);
    }

    /// Set the outcome for a key, appending it if absent.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// The outcome for a key: `None` if the key is absent, `Some(None)` for
    /// a placeholder, `Some(Some(_))` for a delivered value.
    pub fn outcome(&self, key: &str) -> Option<&Option<Value>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ResultMapping {
    type Item = (String, Option<Value>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Normalize a batch outcome into a key-complete mapping, then hand it to
/// the user resolver if one was supplied.
pub fn resolve(
    keys: &[String],
    raw: Option<HashMap<String, Value>>,
    failure: Option<&MultiFailure>,
    resolver: Option<&ResolverFn>,
) -> ResultMapping {
    let mut mapping = ResultMapping::placeholders(keys.iter().cloned());
    if let Some(raw) = raw {
        mapping.overlay(raw);
    }
    match resolver {
        Some(callback) => callback(mapping, failure),
        None => mapping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_set_is_preserved_under_total_failure() {
        let mapping = resolve(&keys(&["0", "1", "2"]), None, None, None);
        assert_eq!(mapping.len(), 3);
        assert!(mapping.iter().all(|(_, value)| value.is_none()));
    }

    #[test]
    fn raw_entries_win_over_placeholders() {
        let raw = HashMap::from([("1".to_string(), json!("done"))]);
        let mapping = resolve(&keys(&["0", "1"]), Some(raw), None, None);
        assert_eq!(mapping.outcome("0"), Some(&None));
        assert_eq!(mapping.outcome("1"), Some(&Some(json!("done"))));
    }

    #[test]
    fn output_order_matches_input_key_order() {
        let raw = HashMap::from([
            ("b".to_string(), json!(2)),
            ("a".to_string(), json!(1)),
        ]);
        let mapping = resolve(&keys(&["b", "a", "c"]), Some(raw), None, None);
        let order: Vec<&str> = mapping.keys().collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn resolver_callback_may_substitute_the_mapping() {
        let resolver: ResolverFn = Box::new(|mapping, _failure| {
            let mut substituted = ResultMapping::default();
            for (key, _) in mapping.iter() {
                substituted.insert(key, Some(json!("testing")));
            }
            substituted
        });
        let mapping = resolve(&keys(&["0", "1"]), None, None, Some(&resolver));
        assert_eq!(mapping.outcome("0"), Some(&Some(json!("testing"))));
        assert_eq!(mapping.outcome("1"), Some(&Some(json!("testing"))));
    }

    #[test]
    fn empty_key_set_resolves_to_empty_mapping() {
        let mapping = resolve(&[], None, None, None);
        assert!(mapping.is_empty());
    }
}
