//! Plugin registry backed by a JSON document on disk.
//!
//! The document is read once at load time. Plugin uris address it by dotted
//! path, e.g. `detectors.face.threshold` or `cameras.0.url`.

use std::path::{Path, PathBuf};

use paws_core::plugin::{PluginRegistry, lookup_dotted};
use paws_types::error::PluginError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("failed to read plugin document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin document {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin document {0} must be a JSON object")]
    NotAnObject(PathBuf),
}

#[derive(Debug, Clone)]
pub struct JsonPluginRegistry {
    root: Value,
}

impl JsonPluginRegistry {
    /// Read and parse the document at `path`.
    pub async fn load(path: &Path) -> Result<Self, PluginLoadError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PluginLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let root: Value = serde_json::from_str(&content).map_err(|source| PluginLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if !root.is_object() {
            return Err(PluginLoadError::NotAnObject(path.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), "loaded plugin document");
        Ok(Self { root })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }
}

impl PluginRegistry for JsonPluginRegistry {
    fn resolve(&self, uri: &str) -> Result<Value, PluginError> {
        lookup_dotted(&self.root, uri)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(uri.to_string()))
    }
}
