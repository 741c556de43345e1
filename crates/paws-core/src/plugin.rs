//! Plugin registry port.
//!
//! Plugin references in input locators are looked up through a
//! [`PluginRegistry`]. The registry is read-only from the engine's side;
//! hosts populate it however they like (see `paws-infra` for a JSON-backed
//! registry).

use dashmap::DashMap;
use paws_types::error::PluginError;
use serde_json::Value;

/// External store of named values addressable by dotted uri.
pub trait PluginRegistry: Send + Sync {
    fn resolve(&self, uri: &str) -> Result<Value, PluginError>;
}

/// Looks up `uri` inside a JSON value by dotted segments.
///
/// Array elements are addressed by index (`"detectors.0.name"`).
pub fn lookup_dotted<'a>(root: &'a Value, uri: &str) -> Option<&'a Value> {
    uri.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Concurrent in-memory registry.
///
/// Keys are top-level names; anything after the first `.` walks into the
/// stored value.
#[derive(Debug, Default)]
pub struct InMemoryPluginRegistry {
    items: DashMap<String, Value>,
}

impl InMemoryPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, value: Value) {
        self.items.insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.items.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PluginRegistry for InMemoryPluginRegistry {
    fn resolve(&self, uri: &str) -> Result<Value, PluginError> {
        if let Some(value) = self.items.get(uri) {
            return Ok(value.clone());
        }
        let (head, rest) = uri
            .split_once('.')
            .ok_or_else(|| PluginError::NotFound(uri.to_string()))?;
        let entry = self
            .items
            .get(head)
            .ok_or_else(|| PluginError::NotFound(uri.to_string()))?;
        lookup_dotted(entry.value(), rest)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(uri.to_string()))
    }
}

/// Registry with nothing in it. Every lookup fails with `NotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPluginRegistry;

impl PluginRegistry for EmptyPluginRegistry {
    fn resolve(&self, uri: &str) -> Result<Value, PluginError> {
        Err(PluginError::NotFound(uri.to_string()))
    }
}
