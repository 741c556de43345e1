//! Input locator resolution.
//!
//! [`resolve`] turns one declared [`InputLocator`] into a [`Resolved`] value.
//! It dispatches with an exhaustive match on the locator variant, reads the
//! tree and plugin registry, and never writes anything. Workflow references
//! in `reference` mode resolve to a [`LiveRef`]: an arena handle that reads
//! the source node when asked, so later writes to the source stay visible.

use paws_types::binding::BatchBinding;
use paws_types::error::{ResolveError, StructuralError};
use paws_types::locator::{InputLocator, LiteralType, RawValue, ReferenceMode};
use serde_json::{Number, Value};

use crate::plugin::PluginRegistry;
use crate::tree::{ItemTree, NodeHandle};

// ---------------------------------------------------------------------------
// Resolved
// ---------------------------------------------------------------------------

/// Live reference to a node in the item tree.
#[derive(Debug, Clone)]
pub struct LiveRef {
    tree: ItemTree,
    handle: NodeHandle,
    uri: String,
}

impl LiveRef {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// The referenced node's value as of now.
    pub fn current(&self) -> Result<Value, StructuralError> {
        self.tree
            .value_of(self.handle)
            .map_err(|_| StructuralError::BrokenReference(self.uri.clone()))
    }
}

/// Outcome of resolving one locator.
#[derive(Debug, Clone)]
pub enum Resolved {
    Absent,
    Value(Value),
    Live(LiveRef),
    /// One resolution per raw entry, for list-valued locators.
    List(Vec<Resolved>),
}

impl Resolved {
    /// Concrete value: `Absent` becomes `null`, live references are read now.
    pub fn materialize(&self) -> Result<Value, ResolveError> {
        match self {
            Resolved::Absent => Ok(Value::Null),
            Resolved::Value(v) => Ok(v.clone()),
            Resolved::Live(live) => Ok(live.current()?),
            Resolved::List(items) => items
                .iter()
                .map(Resolved::materialize)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Resolves the locator of the input slot at `slot_uri`.
///
/// `bindings` is `Some` only while a batch or realtime controller drives the
/// current stack; batch-injected inputs read their own slot uri from it.
pub fn resolve(
    locator: &InputLocator,
    slot_uri: &str,
    tree: &ItemTree,
    plugins: &dyn PluginRegistry,
    bindings: Option<&BatchBinding>,
) -> Result<Resolved, ResolveError> {
    match locator {
        InputLocator::None => Ok(Resolved::Absent),
        InputLocator::LiteralText { ty, raw } => {
            per_item(raw, |text| cast_literal(text, *ty).map(Resolved::Value))
        }
        InputLocator::WorkflowReference { mode, raw } => per_item(raw, |uri| {
            let handle = tree
                .handle(uri)
                .map_err(|_| StructuralError::BrokenReference(uri.to_string()))?;
            Ok(match mode {
                ReferenceMode::Reference => Resolved::Live(LiveRef {
                    tree: tree.clone(),
                    handle,
                    uri: uri.to_string(),
                }),
                ReferenceMode::Path => Resolved::Value(Value::String(uri.to_string())),
            })
        }),
        InputLocator::PluginReference { mode, raw } => per_item(raw, |uri| match mode {
            ReferenceMode::Reference => Ok(Resolved::Value(plugins.resolve(uri)?)),
            ReferenceMode::Path => Ok(Resolved::Value(Value::String(uri.to_string()))),
        }),
        InputLocator::FilesystemPath { raw } => {
            per_item(raw, |path| Ok(Resolved::Value(Value::String(path.to_string()))))
        }
        InputLocator::BatchInjected => {
            let bindings = bindings
                .ok_or_else(|| ResolveError::BatchInjectedOutsideBatch(slot_uri.to_string()))?;
            bindings
                .get(slot_uri)
                .cloned()
                .map(Resolved::Value)
                .ok_or_else(|| ResolveError::MissingBinding(slot_uri.to_string()))
        }
    }
}

fn per_item(
    raw: &RawValue,
    mut f: impl FnMut(&str) -> Result<Resolved, ResolveError>,
) -> Result<Resolved, ResolveError> {
    match raw {
        RawValue::One(text) => f(text),
        RawValue::Many(items) => items
            .iter()
            .map(|text| f(text))
            .collect::<Result<Vec<_>, _>>()
            .map(Resolved::List),
    }
}

/// Casts literal text to `ty`.
pub fn cast_literal(text: &str, ty: LiteralType) -> Result<Value, ResolveError> {
    let fail = |reason: String| ResolveError::TypeCast {
        raw: text.to_string(),
        expected: ty,
        reason,
    };
    let trimmed = text.trim();
    match ty {
        LiteralType::Int => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| fail(e.to_string())),
        LiteralType::Float => {
            let f = trimmed.parse::<f64>().map_err(|e| fail(e.to_string()))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| fail("not a finite number".to_string()))
        }
        LiteralType::String => Ok(Value::String(text.to_string())),
        LiteralType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(fail("expected true/false, 1/0 or yes/no".to_string())),
        },
        LiteralType::Array => match serde_json::from_str::<Value>(trimmed) {
            Ok(v @ Value::Array(_)) => Ok(v),
            Ok(_) => Err(fail("not a JSON array".to_string())),
            Err(e) => Err(fail(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Arithmetic, OperationKind};
    use crate::plugin::{EmptyPluginRegistry, InMemoryPluginRegistry};
    use crate::tree::Payload;
    use serde_json::json;

    fn resolve_plain(locator: &InputLocator, tree: &ItemTree) -> Result<Resolved, ResolveError> {
        resolve(locator, "op.inputs.x", tree, &EmptyPluginRegistry, None)
    }

    #[test]
    fn test_none_is_absent() {
        let tree = ItemTree::new();
        let r = resolve_plain(&InputLocator::None, &tree).unwrap();
        assert!(r.is_absent());
        assert_eq!(r.materialize().unwrap(), Value::Null);
    }

    #[test]
    fn test_literal_casts() {
        let tree = ItemTree::new();
        let int = InputLocator::literal(LiteralType::Int, "42");
        assert_eq!(resolve_plain(&int, &tree).unwrap().materialize().unwrap(), json!(42));

        let bad = InputLocator::literal(LiteralType::Int, "abc");
        let err = resolve_plain(&bad, &tree).unwrap_err();
        assert!(err.is_type_cast());

        assert_eq!(cast_literal(" 2.5 ", LiteralType::Float).unwrap(), json!(2.5));
        assert!(cast_literal("inf", LiteralType::Float).is_err());
        assert_eq!(cast_literal("Yes", LiteralType::Boolean).unwrap(), json!(true));
        assert_eq!(cast_literal("0", LiteralType::Boolean).unwrap(), json!(false));
        assert!(cast_literal("maybe", LiteralType::Boolean).is_err());
        assert_eq!(cast_literal("[1, 2]", LiteralType::Array).unwrap(), json!([1, 2]));
        assert!(cast_literal("{}", LiteralType::Array).is_err());
        assert_eq!(cast_literal(" x ", LiteralType::String).unwrap(), json!(" x "));
    }

    #[test]
    fn test_literal_list_casts_each_item() {
        let tree = ItemTree::new();
        let loc = InputLocator::literal(LiteralType::Int, vec!["1", "2", "3"]);
        assert_eq!(
            resolve_plain(&loc, &tree).unwrap().materialize().unwrap(),
            json!([1, 2, 3])
        );
        let bad = InputLocator::literal(LiteralType::Int, vec!["1", "x"]);
        assert!(resolve_plain(&bad, &tree).is_err());
    }

    #[test]
    fn test_workflow_reference_is_live() {
        let tree = ItemTree::new();
        tree.add_operation("opA", OperationKind::plain(Arithmetic::add()))
            .unwrap();

        let resolved = resolve_plain(&InputLocator::workflow("opA.outputs.result"), &tree).unwrap();
        assert_eq!(resolved.materialize().unwrap(), Value::Null);

        tree.set_value("opA.outputs.result", json!(7)).unwrap();
        assert_eq!(resolved.materialize().unwrap(), json!(7));

        tree.remove("opA").unwrap();
        assert!(matches!(
            resolved.materialize(),
            Err(ResolveError::Structural(StructuralError::BrokenReference(_)))
        ));
    }

    #[test]
    fn test_workflow_reference_path_mode_and_broken() {
        let tree = ItemTree::new();
        tree.add_node("", "data", Payload::Value(json!(1))).unwrap();

        let path = InputLocator::WorkflowReference {
            mode: ReferenceMode::Path,
            raw: "data".into(),
        };
        assert_eq!(
            resolve_plain(&path, &tree).unwrap().materialize().unwrap(),
            json!("data")
        );

        let err = resolve_plain(&InputLocator::workflow("missing.x"), &tree).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Structural(StructuralError::BrokenReference("missing.x".into()))
        );
    }

    #[test]
    fn test_plugin_reference() {
        let tree = ItemTree::new();
        let plugins = InMemoryPluginRegistry::new();
        plugins.insert("detector", json!({ "distance": 0.3 }));

        let loc = InputLocator::plugin("detector.distance");
        let r = resolve(&loc, "op.inputs.x", &tree, &plugins, None).unwrap();
        assert_eq!(r.materialize().unwrap(), json!(0.3));

        let missing = InputLocator::plugin("detector.pixels");
        assert!(matches!(
            resolve(&missing, "op.inputs.x", &tree, &plugins, None),
            Err(ResolveError::Plugin(_))
        ));
    }

    #[test]
    fn test_filesystem_path_is_not_checked() {
        let tree = ItemTree::new();
        let loc = InputLocator::path("/no/such/file.tif");
        assert_eq!(
            resolve_plain(&loc, &tree).unwrap().materialize().unwrap(),
            json!("/no/such/file.tif")
        );
    }

    #[test]
    fn test_batch_injected() {
        let tree = ItemTree::new();
        let loc = InputLocator::BatchInjected;
        assert_eq!(
            resolve_plain(&loc, &tree).unwrap_err(),
            ResolveError::BatchInjectedOutsideBatch("op.inputs.x".into())
        );

        let bindings: BatchBinding = [("op.inputs.x", json!(9))].into_iter().collect();
        let r = resolve(&loc, "op.inputs.x", &tree, &EmptyPluginRegistry, Some(&bindings)).unwrap();
        assert_eq!(r.materialize().unwrap(), json!(9));

        let err = resolve(&loc, "op.inputs.y", &tree, &EmptyPluginRegistry, Some(&bindings))
            .unwrap_err();
        assert_eq!(err, ResolveError::MissingBinding("op.inputs.y".into()));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let tree = ItemTree::new();
        let loc = InputLocator::literal(LiteralType::Float, "1.25");
        let a = resolve_plain(&loc, &tree).unwrap().materialize().unwrap();
        let b = resolve_plain(&loc, &tree).unwrap().materialize().unwrap();
        assert_eq!(a, b);
    }
}
