//! Event types for the engine event bus and the item tree change feed.
//!
//! `EngineEvent` is broadcast while a workflow runs; `TreeEvent` is broadcast
//! on every item tree mutation. Both are Clone + Send + Sync for use with
//! tokio broadcast channels.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::binding::ControlMode;

/// Events emitted while building and running an execution stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An execution stack was (re)built.
    StackBuilt { layers: usize, operations: usize },

    RunStarted { run_id: Uuid },

    /// A plain layer is about to execute. `depth` is 0 for the top-level stack.
    LayerStarted {
        run_id: Uuid,
        depth: usize,
        index: usize,
        operations: Vec<String>,
    },

    OperationCompleted {
        run_id: Uuid,
        uri: String,
        duration_ms: u64,
    },

    OperationFailed {
        run_id: Uuid,
        uri: String,
        error: String,
    },

    /// A control operation's body finished and its loop is starting.
    ControllerStarted {
        run_id: Uuid,
        uri: String,
        mode: ControlMode,
    },

    IterationStarted {
        run_id: Uuid,
        controller: String,
        iteration: usize,
        /// Known for batch controllers, unknown for realtime ones.
        total: Option<usize>,
    },

    IterationCompleted {
        run_id: Uuid,
        controller: String,
        iteration: usize,
    },

    /// A realtime controller had nothing to offer and is sleeping.
    WaitingForBinding { run_id: Uuid, controller: String },

    ControllerFinished {
        run_id: Uuid,
        controller: String,
        iterations: usize,
    },

    /// The run ended early because stop was requested.
    RunStopped { run_id: Uuid },

    RunCompleted { run_id: Uuid, duration_ms: u64 },

    RunFailed { run_id: Uuid, error: String },
}

impl EngineEvent {
    /// The run this event belongs to, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::StackBuilt { .. } => None,
            EngineEvent::RunStarted { run_id }
            | EngineEvent::LayerStarted { run_id, .. }
            | EngineEvent::OperationCompleted { run_id, .. }
            | EngineEvent::OperationFailed { run_id, .. }
            | EngineEvent::ControllerStarted { run_id, .. }
            | EngineEvent::IterationStarted { run_id, .. }
            | EngineEvent::IterationCompleted { run_id, .. }
            | EngineEvent::WaitingForBinding { run_id, .. }
            | EngineEvent::ControllerFinished { run_id, .. }
            | EngineEvent::RunStopped { run_id }
            | EngineEvent::RunCompleted { run_id, .. }
            | EngineEvent::RunFailed { run_id, .. } => Some(*run_id),
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::StackBuilt { layers, operations } => {
                write!(f, "stack built: {operations} operations in {layers} layers")
            }
            EngineEvent::RunStarted { .. } => f.write_str("run started"),
            EngineEvent::LayerStarted {
                depth,
                index,
                operations,
                ..
            } => write!(
                f,
                "layer {index} (depth {depth}): {}",
                operations.join(", ")
            ),
            EngineEvent::OperationCompleted {
                uri, duration_ms, ..
            } => write!(f, "{uri} finished in {duration_ms}ms"),
            EngineEvent::OperationFailed { uri, error, .. } => write!(f, "{uri} failed: {error}"),
            EngineEvent::ControllerStarted { uri, mode, .. } => {
                write!(f, "{mode} controller {uri} started")
            }
            EngineEvent::IterationStarted {
                controller,
                iteration,
                total,
                ..
            } => match total {
                Some(total) => write!(f, "{controller}: iteration {} / {total}", iteration + 1),
                None => write!(f, "{controller}: iteration {}", iteration + 1),
            },
            EngineEvent::IterationCompleted {
                controller,
                iteration,
                ..
            } => write!(f, "{controller}: iteration {} done", iteration + 1),
            EngineEvent::WaitingForBinding { controller, .. } => {
                write!(f, "{controller}: waiting for input")
            }
            EngineEvent::ControllerFinished {
                controller,
                iterations,
                ..
            } => write!(f, "{controller} finished after {iterations} iterations"),
            EngineEvent::RunStopped { .. } => f.write_str("run stopped"),
            EngineEvent::RunCompleted { duration_ms, .. } => {
                write!(f, "run completed in {duration_ms}ms")
            }
            EngineEvent::RunFailed { error, .. } => write!(f, "run failed: {error}"),
        }
    }
}

/// Item tree mutations, published for dependency invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    NodeAdded { uri: String },
    /// Emitted once for the removed subtree root.
    NodeRemoved { uri: String },
    LocatorChanged { uri: String },
    ValueChanged { uri: String },
}

impl TreeEvent {
    pub fn uri(&self) -> &str {
        match self {
            TreeEvent::NodeAdded { uri }
            | TreeEvent::NodeRemoved { uri }
            | TreeEvent::LocatorChanged { uri }
            | TreeEvent::ValueChanged { uri } => uri,
        }
    }

    /// True when the event can change the shape of the execution stack.
    pub fn is_structural(&self) -> bool {
        !matches!(self, TreeEvent::ValueChanged { .. })
    }
}
