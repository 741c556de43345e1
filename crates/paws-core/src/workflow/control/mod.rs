//! Batch and realtime controller protocol.
//!
//! A controller is an operation that, after its own body runs, drives a
//! nested execution stack over its sub-operations once per binding:
//!
//! - [`BatchController`] hands over a finite list of bindings, run strictly
//!   in order.
//! - [`RealtimeController`] is polled for the next binding until it reports
//!   [`NextBinding::Closed`] or the run is stopped.
//!
//! After every iteration the coordinator snapshots the controller's
//! `recorded_uris()` and hands the snapshot back through `append_result`.

mod channel;
mod value_batch;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use paws_types::binding::{BatchBinding, IterationSnapshot, NextBinding};
use serde_json::Value;

use crate::operation::Operation;

pub use channel::{ChannelRealtime, RealtimeFeed};
pub use value_batch::ValueBatch;

/// Behaviour shared by batch and realtime controllers.
pub trait Controller: Operation {
    /// Top-level operations this controller runs once per iteration.
    fn sub_operation_uris(&self) -> Vec<String>;

    /// Input slot uris (`<op>.inputs.<name>`) the bindings write to.
    fn input_routes(&self) -> Vec<String>;

    /// Uris captured into each iteration snapshot.
    fn recorded_uris(&self) -> Vec<String>;

    fn append_result(&self, snapshot: IterationSnapshot);

    fn results(&self) -> Vec<IterationSnapshot>;

    /// Drops results from a previous run. Called before the first iteration.
    fn clear_results(&self);

    /// Output slot that receives the result list after every iteration.
    fn results_output(&self) -> Option<&str> {
        None
    }
}

pub trait BatchController: Controller {
    /// Every binding for this run, in iteration order. Called once, after
    /// the controller body has run.
    fn next_binding_batch(&self) -> Vec<BatchBinding>;
}

pub trait RealtimeController: Controller {
    fn next_binding(&self) -> BoxFuture<'_, NextBinding>;

    /// How long to wait after a `Pending` poll.
    fn poll_delay(&self) -> Duration;
}

/// Result list for controller implementations.
#[derive(Debug, Default)]
pub struct ResultLog {
    entries: Mutex<Vec<IterationSnapshot>>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, snapshot: IterationSnapshot) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot);
    }

    pub fn snapshot(&self) -> Vec<IterationSnapshot> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The value a controller publishes on its results output: one rendered
/// snapshot object per iteration.
pub fn results_value(results: &[IterationSnapshot]) -> Value {
    Value::Array(results.iter().map(|s| s.values.clone()).collect())
}

/// Pairs one iteration value with the controller's routes.
///
/// A single route takes the value as-is; several routes take the elements of
/// an array value in order. Returns `None` when an array value's length does
/// not match the route count.
pub fn bind_routes(routes: &[String], value: &Value) -> Option<BatchBinding> {
    match routes {
        [] => Some(BatchBinding::new()),
        [route] => Some([(route.clone(), value.clone())].into_iter().collect()),
        _ => match value {
            Value::Array(items) if items.len() == routes.len() => Some(
                routes
                    .iter()
                    .cloned()
                    .zip(items.iter().cloned())
                    .collect(),
            ),
            _ => None,
        },
    }
}
