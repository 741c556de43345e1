//! Column selection over batch results.

use futures_util::future::{self, BoxFuture};
use paws_types::error::OperationError;
use serde_json::Value;

use super::{
    Operation, OperationInputs, OperationOutputs, flag, required_array, required_str,
};

/// Collects one variable from every iteration of a batch, in iteration order.
///
/// `batch_outputs` is the result list a batch controller publishes: one
/// object per iteration keyed `<operation>.{inputs|outputs}.<var>`.
/// `from_outputs` selects between the operation's outputs (default) and
/// its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectBatchItems;

impl SelectBatchItems {
    pub fn new() -> Self {
        Self
    }

    fn select(inputs: &OperationInputs) -> Result<Value, OperationError> {
        let batch_outputs = required_array(inputs, "batch_outputs")?;
        let operation = required_str(inputs, "operation")?;
        let var_name = required_str(inputs, "var_name")?;
        let section = if flag(inputs, "from_outputs", true)? {
            "outputs"
        } else {
            "inputs"
        };

        let var_list = batch_outputs
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.get(operation)
                    .and_then(|op| op.get(section))
                    .and_then(|slots| slots.get(var_name))
                    .cloned()
                    .ok_or_else(|| {
                        OperationError::invalid(
                            "batch_outputs",
                            format!("iteration {index} has no {operation}.{section}.{var_name}"),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Value::Array(var_list))
    }
}

impl Operation for SelectBatchItems {
    fn kind(&self) -> &str {
        "select_batch_items"
    }

    fn input_names(&self) -> Vec<String> {
        ["batch_outputs", "operation", "from_outputs", "var_name"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["var_list".to_string()]
    }

    fn description(&self) -> &str {
        "List one variable across every iteration of a batch"
    }

    fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        let result = Self::select(inputs)
            .map(|list| OperationOutputs::from([("var_list".to_string(), list)]));
        Box::pin(future::ready(result))
    }
}
