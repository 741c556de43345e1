//! Per-iteration input overrides produced by batch and realtime controllers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered mapping of input-slot uri to the value injected for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchBinding(BTreeMap<String, Value>);

impl BatchBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(uri.into(), value)
    }

    pub fn get(&self, uri: &str) -> Option<&Value> {
        self.0.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.0.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns a copy of `self` overlaid by `inner`; entries in `inner` win.
    ///
    /// Nested controllers merge their binding over the one inherited from the
    /// enclosing iteration.
    pub fn merged_with(&self, inner: &BatchBinding) -> BatchBinding {
        let mut merged = self.clone();
        for (uri, value) in inner.iter() {
            merged.0.insert(uri.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for BatchBinding {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// What a realtime controller has to offer on one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum NextBinding {
    /// A binding is ready to run.
    Ready(BatchBinding),
    /// Nothing available right now; poll again after the controller's delay.
    Pending,
    /// The producer is gone; the realtime loop ends normally.
    Closed,
}

/// Which loop drives a control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Batch,
    Realtime,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Batch => f.write_str("batch"),
            ControlMode::Realtime => f.write_str("realtime"),
        }
    }
}

/// Values captured from the tree after one controller iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// The binding applied for this iteration.
    pub binding: BatchBinding,
    pub recorded_at: DateTime<Utc>,
    /// Recorded uris merged into one object keyed by uri segments.
    pub values: Value,
}

impl IterationSnapshot {
    pub fn new(iteration: usize, binding: BatchBinding, values: Value) -> Self {
        Self {
            iteration,
            binding,
            recorded_at: Utc::now(),
            values,
        }
    }

    /// Looks up a dotted uri inside `values`.
    pub fn value_at(&self, uri: &str) -> Option<&Value> {
        uri.split('.')
            .try_fold(&self.values, |node, segment| node.get(segment))
    }
}
