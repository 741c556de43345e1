//! The operation contract consumed by the engine.
//!
//! An [`Operation`] declares named input and output slots and exposes one
//! async `run`. The engine never inspects what an operation computes; it
//! resolves inputs, calls `run`, and writes the returned map back into the
//! item tree.
//!
//! Operations are stored in the tree as an [`OperationKind`], which tells the
//! scheduler whether the operation is a plain unit of work or a controller
//! that drives a nested sub-schedule.

pub mod arithmetic;
pub mod select;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use paws_types::binding::ControlMode;
use paws_types::error::OperationError;
use serde_json::Value;

use crate::workflow::control::{BatchController, RealtimeController};

pub use arithmetic::{Arithmetic, ArithmeticOp};
pub use select::SelectBatchItems;

/// Materialized input values keyed by input name.
pub type OperationInputs = BTreeMap<String, Value>;

/// Output values keyed by output name.
pub type OperationOutputs = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Operation trait
// ---------------------------------------------------------------------------

/// A unit of work with named inputs and outputs.
///
/// Object-safe: `run` returns a boxed future so operations can be stored as
/// `Arc<dyn Operation>` and moved into spawned tasks.
pub trait Operation: Send + Sync {
    /// Short type name, used in logs and stack listings.
    fn kind(&self) -> &str;

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    fn description(&self) -> &str {
        ""
    }

    /// Execute with the given materialized inputs.
    ///
    /// Every declared input name is present in `inputs`; an unset input is
    /// `Value::Null`.
    fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>>;
}

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// An operation as stored in the item tree.
#[derive(Clone)]
pub enum OperationKind {
    Plain(Arc<dyn Operation>),
    Batch(Arc<dyn BatchController>),
    Realtime(Arc<dyn RealtimeController>),
}

impl OperationKind {
    pub fn plain(op: impl Operation + 'static) -> Self {
        OperationKind::Plain(Arc::new(op))
    }

    pub fn batch(controller: impl BatchController + 'static) -> Self {
        OperationKind::Batch(Arc::new(controller))
    }

    pub fn realtime(controller: impl RealtimeController + 'static) -> Self {
        OperationKind::Realtime(Arc::new(controller))
    }

    /// `None` for plain operations.
    pub fn control_mode(&self) -> Option<ControlMode> {
        match self {
            OperationKind::Plain(_) => None,
            OperationKind::Batch(_) => Some(ControlMode::Batch),
            OperationKind::Realtime(_) => Some(ControlMode::Realtime),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            OperationKind::Plain(op) => op.kind(),
            OperationKind::Batch(c) => c.kind(),
            OperationKind::Realtime(c) => c.kind(),
        }
    }

    pub fn input_names(&self) -> Vec<String> {
        match self {
            OperationKind::Plain(op) => op.input_names(),
            OperationKind::Batch(c) => c.input_names(),
            OperationKind::Realtime(c) => c.input_names(),
        }
    }

    pub fn output_names(&self) -> Vec<String> {
        match self {
            OperationKind::Plain(op) => op.output_names(),
            OperationKind::Batch(c) => c.output_names(),
            OperationKind::Realtime(c) => c.output_names(),
        }
    }

    /// Sub-operations claimed by a controller; empty for plain operations.
    pub fn sub_operation_uris(&self) -> Vec<String> {
        match self {
            OperationKind::Plain(_) => Vec::new(),
            OperationKind::Batch(c) => c.sub_operation_uris(),
            OperationKind::Realtime(c) => c.sub_operation_uris(),
        }
    }

    /// Input slots a controller injects per iteration; empty for plain operations.
    pub fn input_routes(&self) -> Vec<String> {
        match self {
            OperationKind::Plain(_) => Vec::new(),
            OperationKind::Batch(c) => c.input_routes(),
            OperationKind::Realtime(c) => c.input_routes(),
        }
    }

    pub fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        match self {
            OperationKind::Plain(op) => op.run(inputs),
            OperationKind::Batch(c) => c.run(inputs),
            OperationKind::Realtime(c) => c.run(inputs),
        }
    }
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            OperationKind::Plain(_) => "Plain",
            OperationKind::Batch(_) => "Batch",
            OperationKind::Realtime(_) => "Realtime",
        };
        f.debug_tuple(variant).field(&self.kind()).finish()
    }
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// Returns the named input, treating `null` as missing.
pub fn required<'a>(inputs: &'a OperationInputs, name: &str) -> Result<&'a Value, OperationError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Err(OperationError::MissingInput(name.to_string())),
        Some(value) => Ok(value),
    }
}

pub fn required_str<'a>(inputs: &'a OperationInputs, name: &str) -> Result<&'a str, OperationError> {
    required(inputs, name)?
        .as_str()
        .ok_or_else(|| OperationError::invalid(name, "expected a string"))
}

pub fn required_array<'a>(
    inputs: &'a OperationInputs,
    name: &str,
) -> Result<&'a Vec<Value>, OperationError> {
    required(inputs, name)?
        .as_array()
        .ok_or_else(|| OperationError::invalid(name, "expected an array"))
}

/// Boolean input; `null` or missing yields `default`.
pub fn flag(inputs: &OperationInputs, name: &str, default: bool) -> Result<bool, OperationError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(OperationError::invalid(name, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FnOp;
    use serde_json::json;

    #[test]
    fn test_required_treats_null_as_missing() {
        let mut inputs = OperationInputs::new();
        inputs.insert("a".into(), Value::Null);
        assert_eq!(
            required(&inputs, "a"),
            Err(OperationError::MissingInput("a".into()))
        );
        assert!(required(&inputs, "b").is_err());
    }

    #[test]
    fn test_typed_helpers() {
        let mut inputs = OperationInputs::new();
        inputs.insert("name".into(), json!("fit"));
        inputs.insert("items".into(), json!([1, 2]));
        inputs.insert("on".into(), json!(true));

        assert_eq!(required_str(&inputs, "name").unwrap(), "fit");
        assert_eq!(required_array(&inputs, "items").unwrap().len(), 2);
        assert!(flag(&inputs, "on", false).unwrap());
        assert!(flag(&inputs, "off", true).unwrap());
        assert!(required_str(&inputs, "items").is_err());
    }

    #[tokio::test]
    async fn test_kind_delegates_to_plain_operation() {
        let op = OperationKind::plain(FnOp::new("double", &["x"], &["y"], |inputs| {
            let x = required(inputs, "x")?.as_i64().unwrap_or(0);
            Ok([("y".to_string(), json!(x * 2))].into_iter().collect())
        }));

        assert_eq!(op.kind(), "double");
        assert_eq!(op.control_mode(), None);
        assert!(op.sub_operation_uris().is_empty());

        let inputs: OperationInputs = [("x".to_string(), json!(21))].into_iter().collect();
        let out = op.run(&inputs).await.unwrap();
        assert_eq!(out["y"], json!(42));
        assert_eq!(format!("{op:?}"), "Plain(\"double\")");
    }
}
