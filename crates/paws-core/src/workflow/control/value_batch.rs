use std::sync::{Mutex, PoisonError};

use futures_util::future::{self, BoxFuture};
use paws_types::binding::{BatchBinding, IterationSnapshot};
use paws_types::error::OperationError;
use serde_json::Value;

use super::{BatchController, Controller, ResultLog, bind_routes, results_value};
use crate::operation::{Operation, OperationInputs, OperationOutputs, required_array};

/// Batch controller over a list of values.
///
/// Input `values` is an array; each element becomes one iteration. With a
/// single route the element is injected as-is, with several routes the
/// element must be an array with one entry per route.
///
/// Outputs `count` (number of iterations) and `batch_outputs` (one snapshot
/// object per finished iteration).
#[derive(Debug, Default)]
pub struct ValueBatch {
    sub_operations: Vec<String>,
    routes: Vec<String>,
    recorded: Vec<String>,
    bindings: Mutex<Vec<BatchBinding>>,
    results: ResultLog,
}

impl ValueBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sub_operations<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_operations = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_routes<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn recording<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recorded = uris.into_iter().map(Into::into).collect();
        self
    }

    /// The published result list, as written to `batch_outputs`.
    pub fn results_value(&self) -> Value {
        results_value(&self.results.snapshot())
    }

    fn prepare(&self, inputs: &OperationInputs) -> Result<OperationOutputs, OperationError> {
        let values = required_array(inputs, "values")?;
        let bindings = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                bind_routes(&self.routes, value).ok_or_else(|| {
                    OperationError::invalid(
                        "values",
                        format!(
                            "element {i} must be an array of {} values, one per route",
                            self.routes.len()
                        ),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = bindings.len();
        *self.bindings.lock().unwrap_or_else(PoisonError::into_inner) = bindings;

        Ok(OperationOutputs::from([
            ("count".to_string(), Value::from(count)),
            ("batch_outputs".to_string(), Value::Array(Vec::new())),
        ]))
    }
}

impl Operation for ValueBatch {
    fn kind(&self) -> &str {
        "value_batch"
    }

    fn input_names(&self) -> Vec<String> {
        vec!["values".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["count".to_string(), "batch_outputs".to_string()]
    }

    fn description(&self) -> &str {
        "Run the sub-operations once per element of values"
    }

    fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        Box::pin(future::ready(self.prepare(inputs)))
    }
}

impl Controller for ValueBatch {
    fn sub_operation_uris(&self) -> Vec<String> {
        self.sub_operations.clone()
    }

    fn input_routes(&self) -> Vec<String> {
        self.routes.clone()
    }

    fn recorded_uris(&self) -> Vec<String> {
        self.recorded.clone()
    }

    fn append_result(&self, snapshot: IterationSnapshot) {
        self.results.push(snapshot);
    }

    fn results(&self) -> Vec<IterationSnapshot> {
        self.results.snapshot()
    }

    fn clear_results(&self) {
        self.results.clear();
    }

    fn results_output(&self) -> Option<&str> {
        Some("batch_outputs")
    }
}

impl BatchController for ValueBatch {
    fn next_binding_batch(&self) -> Vec<BatchBinding> {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
