//! Engine configuration.
//!
//! `EngineConfig` is the `config.toml` that sizes the execution pool and the
//! event channels. All fields have defaults, so an empty file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a workflow engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution units per workflow. Values below 1 are treated as 1.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Poll delay for built-in realtime controllers, in milliseconds.
    #[serde(default = "default_poll_delay_ms")]
    pub default_poll_delay_ms: u64,

    /// Broadcast capacity for engine and tree events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Optional per-operation timeout in seconds.
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,
}

fn default_pool_size() -> usize {
    4
}

fn default_poll_delay_ms() -> u64 {
    250
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            default_poll_delay_ms: default_poll_delay_ms(),
            event_capacity: default_event_capacity(),
            operation_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.max(1)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.default_poll_delay_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    /// Broadcast channels panic on zero capacity.
    pub fn effective_event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}
