//! Execution stack construction.
//!
//! The stack builder partitions operations into layers so that every
//! workflow reference points into a strictly earlier layer. It is a pure
//! function of a [`Catalog`], a member list, the starting frontier of
//! satisfied uris and the active batch routes, and calls itself to build the
//! nested stack of each controller.
//!
//! # Algorithm
//!
//! 1. Start from the frontier (static data uris at the top level).
//! 2. Collect every unscheduled member that is ready under the frontier.
//! 3. If any plain operation is ready, all ready plain operations form the
//!    next layer and ready controllers wait a round.
//! 4. Otherwise the first controller (declaration order) whose nested stack
//!    builds becomes a control layer on its own.
//! 5. Merge the layer's contributions into the frontier and repeat until
//!    every member is placed, or nothing is ready (`Unschedulable`).

use std::collections::{HashMap, HashSet};
use std::fmt;

use paws_types::binding::ControlMode;
use paws_types::error::StructuralError;
use thiserror::Error;

use super::catalog::{Catalog, OpDecl};
use super::readiness::{contribution, is_ready};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unschedulable graph: no progress possible for {}", .pending.join(", "))]
    Unschedulable { pending: Vec<String> },

    #[error("operation '{uri}' is claimed by both '{first}' and '{second}'")]
    SharedSubOperation {
        uri: String,
        first: String,
        second: String,
    },

    #[error("operation '{uri}' is listed more than once by '{controller}'")]
    DuplicateSubOperation { uri: String, controller: String },

    #[error(transparent)]
    Structural(#[from] StructuralError),
}

// ---------------------------------------------------------------------------
// Stack types
// ---------------------------------------------------------------------------

/// A controller paired with the stack it drives.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlLayer {
    pub uri: String,
    pub mode: ControlMode,
    pub nested: ExecutionStack,
    /// Frontier and routes in effect where this layer was placed, so the
    /// nested stack can be rebuilt after the controller body runs.
    pub frontier: HashSet<String>,
    pub routes: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionLayer {
    /// Plain operations that may run concurrently.
    Operations(Vec<String>),
    Control(ControlLayer),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStack {
    layers: Vec<ExecutionLayer>,
}

impl ExecutionStack {
    pub fn layers(&self) -> &[ExecutionLayer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Every operation uri in the stack, nested ones included, in run order.
    pub fn operations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for layer in &self.layers {
            match layer {
                ExecutionLayer::Operations(uris) => out.extend(uris.iter().cloned()),
                ExecutionLayer::Control(control) => {
                    out.push(control.uri.clone());
                    out.extend(control.nested.operations());
                }
            }
        }
        out
    }

    /// Depth-first listing: `(depth, layer index, label)` per layer.
    pub fn outline(&self) -> Vec<(usize, usize, String)> {
        let mut rows = Vec::new();
        self.outline_into(0, &mut rows);
        rows
    }

    fn outline_into(&self, depth: usize, rows: &mut Vec<(usize, usize, String)>) {
        for (index, layer) in self.layers.iter().enumerate() {
            match layer {
                ExecutionLayer::Operations(uris) => {
                    rows.push((depth, index, uris.join(", ")));
                }
                ExecutionLayer::Control(control) => {
                    rows.push((depth, index, format!("{} [{}]", control.uri, control.mode)));
                    control.nested.outline_into(depth + 1, rows);
                }
            }
        }
    }
}

impl fmt::Display for ExecutionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, index, label) in self.outline() {
            writeln!(f, "{:indent$}{index}: {label}", "", indent = depth * 2)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Builds the top-level stack for every operation in `catalog`.
pub fn build_stack(catalog: &Catalog) -> Result<ExecutionStack, ScheduleError> {
    let members = top_level_members(catalog)?;
    let stack = build_over(catalog, &members, catalog.static_uris().clone(), &HashSet::new())?;

    let placed: HashSet<String> = stack.operations().into_iter().collect();
    let mut orphans: Vec<String> = catalog
        .ops()
        .iter()
        .filter(|op| !placed.contains(&op.uri))
        .map(|op| op.uri.clone())
        .collect();
    if !orphans.is_empty() {
        // Only reachable through a cycle of controller claims.
        orphans.sort();
        return Err(ScheduleError::Unschedulable { pending: orphans });
    }
    Ok(stack)
}

/// Builds the nested stack of the controller at `controller_uri`.
///
/// `frontier` and `routes` are the ones in effect where the controller is
/// placed; the controller's own contribution and input routes are added here.
pub fn build_nested(
    catalog: &Catalog,
    controller_uri: &str,
    frontier: &HashSet<String>,
    routes: &HashSet<String>,
) -> Result<ExecutionStack, ScheduleError> {
    let decl = catalog
        .get(controller_uri)
        .ok_or_else(|| StructuralError::NotFound(controller_uri.to_string()))?;
    let control = decl
        .control
        .as_ref()
        .ok_or_else(|| StructuralError::NotAnOperation(controller_uri.to_string()))?;

    for sub in &control.sub_operations {
        if catalog.get(sub).is_none() {
            return Err(StructuralError::NotFound(sub.clone()).into());
        }
    }

    let mut nested_frontier = frontier.clone();
    nested_frontier.extend(contribution(decl));
    let mut nested_routes = routes.clone();
    nested_routes.extend(control.routes.iter().cloned());

    build_over(catalog, &control.sub_operations, nested_frontier, &nested_routes)
}

/// Top-level operations minus everything claimed as a sub-operation.
fn top_level_members(catalog: &Catalog) -> Result<Vec<String>, ScheduleError> {
    let mut claimed: HashMap<&str, &str> = HashMap::new();
    for op in catalog.ops() {
        let Some(control) = &op.control else {
            continue;
        };
        for sub in &control.sub_operations {
            if catalog.get(sub).is_none() {
                return Err(StructuralError::NotFound(sub.clone()).into());
            }
            if let Some(first) = claimed.insert(sub.as_str(), op.uri.as_str()) {
                if first == op.uri {
                    return Err(ScheduleError::DuplicateSubOperation {
                        uri: sub.clone(),
                        controller: op.uri.clone(),
                    });
                }
                return Err(ScheduleError::SharedSubOperation {
                    uri: sub.clone(),
                    first: first.to_string(),
                    second: op.uri.clone(),
                });
            }
        }
    }
    Ok(catalog
        .ops()
        .iter()
        .filter(|op| !claimed.contains_key(op.uri.as_str()))
        .map(|op| op.uri.clone())
        .collect())
}

fn build_over(
    catalog: &Catalog,
    members: &[String],
    mut frontier: HashSet<String>,
    routes: &HashSet<String>,
) -> Result<ExecutionStack, ScheduleError> {
    let mut pending: Vec<&OpDecl> = members
        .iter()
        .map(|uri| {
            catalog
                .get(uri)
                .ok_or_else(|| StructuralError::NotFound(uri.clone()))
        })
        .collect::<Result<_, _>>()?;
    let mut layers = Vec::new();

    while !pending.is_empty() {
        let ready: Vec<&OpDecl> = pending
            .iter()
            .copied()
            .filter(|op| is_ready(op, &frontier, routes))
            .collect();

        let plain: Vec<&OpDecl> = ready.iter().copied().filter(|op| !op.is_controller()).collect();

        let placed: Vec<&OpDecl> = if !plain.is_empty() {
            for op in &plain {
                frontier.extend(contribution(op));
            }
            layers.push(ExecutionLayer::Operations(
                plain.iter().map(|op| op.uri.clone()).collect(),
            ));
            plain
        } else {
            let mut chosen = None;
            for op in ready.iter().copied() {
                match build_nested(catalog, &op.uri, &frontier, routes) {
                    Ok(nested) => {
                        chosen = Some((op, nested));
                        break;
                    }
                    Err(ScheduleError::Unschedulable { .. }) => continue,
                    Err(other) => return Err(other),
                }
            }
            let Some((op, nested)) = chosen else {
                return Err(ScheduleError::Unschedulable {
                    pending: pending.iter().map(|op| op.uri.clone()).collect(),
                });
            };
            let Some(control) = &op.control else {
                return Err(StructuralError::NotAnOperation(op.uri.clone()).into());
            };

            let layer = ControlLayer {
                uri: op.uri.clone(),
                mode: control.mode,
                frontier: frontier.clone(),
                routes: routes.clone(),
                nested,
            };
            frontier.extend(contribution(op));
            for uri in layer.nested.operations() {
                if let Some(inner) = catalog.get(&uri) {
                    frontier.extend(contribution(inner));
                }
            }
            layers.push(ExecutionLayer::Control(layer));
            vec![op]
        };

        pending.retain(|op| !placed.iter().any(|p| p.uri == op.uri));
    }

    Ok(ExecutionStack { layers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog_of, controller_decl, decl};
    use paws_types::locator::{InputLocator, LiteralType};

    fn layer_uris(stack: &ExecutionStack, index: usize) -> Vec<String> {
        match &stack.layers()[index] {
            ExecutionLayer::Operations(uris) => uris.clone(),
            ExecutionLayer::Control(c) => vec![c.uri.clone()],
        }
    }

    #[test]
    fn test_chain_is_layered_in_order() {
        let catalog = catalog_of(vec![
            decl("c", &[("x", InputLocator::workflow("b.outputs.y"))], &["y"]),
            decl("a", &[("x", InputLocator::literal(LiteralType::Int, "1"))], &["y"]),
            decl("b", &[("x", InputLocator::workflow("a.outputs.y"))], &["y"]),
            decl("d", &[("x", InputLocator::None)], &["y"]),
        ]);
        let stack = build_stack(&catalog).unwrap();

        assert_eq!(stack.len(), 3);
        assert_eq!(layer_uris(&stack, 0), vec!["a", "d"]);
        assert_eq!(layer_uris(&stack, 1), vec!["b"]);
        assert_eq!(layer_uris(&stack, 2), vec!["c"]);
    }

    #[test]
    fn test_every_operation_once_and_after_its_producers() {
        let catalog = catalog_of(vec![
            decl("e", &[("x", InputLocator::workflow(vec!["b.outputs.y", "d.outputs.y"]))], &["y"]),
            decl("b", &[("x", InputLocator::workflow("a.outputs.y"))], &["y"]),
            decl("a", &[], &["y"]),
            decl("d", &[("x", InputLocator::workflow("a.inputs"))], &["y"]),
        ]);
        let stack = build_stack(&catalog).unwrap();

        let mut seen = stack.operations();
        assert_eq!(seen.len(), 4);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);

        let layer_of = |uri: &str| {
            (0..stack.len())
                .find(|&i| layer_uris(&stack, i).iter().any(|u| u == uri))
                .unwrap()
        };
        assert!(layer_of("a") < layer_of("b"));
        assert!(layer_of("a") < layer_of("d"));
        assert!(layer_of("b") < layer_of("e"));
        assert!(layer_of("d") < layer_of("e"));
    }

    #[test]
    fn test_cycle_is_unschedulable() {
        let catalog = catalog_of(vec![
            decl("a", &[("x", InputLocator::workflow("b.outputs.y"))], &["y"]),
            decl("b", &[("x", InputLocator::workflow("a.outputs.y"))], &["y"]),
            decl("c", &[], &["y"]),
        ]);
        let err = build_stack(&catalog).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Unschedulable {
                pending: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_static_data_is_in_initial_frontier() {
        let catalog = catalog_of(vec![decl(
            "a",
            &[("x", InputLocator::workflow("data.x"))],
            &["y"],
        )])
        .with_static_uris(["data".to_string(), "data.x".to_string()]);
        assert_eq!(build_stack(&catalog).unwrap().len(), 1);
    }

    #[test]
    fn test_controller_owns_nested_stack() {
        let catalog = catalog_of(vec![
            decl("pre", &[], &["y"]),
            controller_decl(
                "batch",
                ControlMode::Batch,
                &[("values", InputLocator::workflow("pre.outputs.y"))],
                &["batch_outputs"],
                &["add", "scale"],
                &["add.inputs.a"],
            ),
            decl(
                "add",
                &[("a", InputLocator::BatchInjected), ("b", InputLocator::None)],
                &["result"],
            ),
            decl("scale", &[("x", InputLocator::workflow("add.outputs.result"))], &["y"]),
            decl("select", &[("x", InputLocator::workflow("batch.outputs.batch_outputs"))], &["y"]),
        ]);
        let stack = build_stack(&catalog).unwrap();

        assert_eq!(stack.len(), 3);
        assert_eq!(layer_uris(&stack, 0), vec!["pre"]);
        let ExecutionLayer::Control(control) = &stack.layers()[1] else {
            panic!("expected a control layer");
        };
        assert_eq!(control.uri, "batch");
        assert_eq!(control.mode, ControlMode::Batch);
        assert_eq!(control.nested.len(), 2);
        assert_eq!(layer_uris(&control.nested, 0), vec!["add"]);
        assert_eq!(layer_uris(&control.nested, 1), vec!["scale"]);
        assert_eq!(layer_uris(&stack, 2), vec!["select"]);

        let rebuilt = build_nested(&catalog, "batch", &control.frontier, &control.routes).unwrap();
        assert_eq!(rebuilt, control.nested);
    }

    #[test]
    fn test_ready_controller_waits_for_plain_operations() {
        let catalog = catalog_of(vec![
            controller_decl("batch", ControlMode::Batch, &[], &[], &[], &[]),
            decl("a", &[], &["y"]),
        ]);
        let stack = build_stack(&catalog).unwrap();
        assert_eq!(layer_uris(&stack, 0), vec!["a"]);
        assert_eq!(layer_uris(&stack, 1), vec!["batch"]);
    }

    #[test]
    fn test_controller_with_unbuildable_nested_stack_is_not_ready() {
        let catalog = catalog_of(vec![
            controller_decl("batch", ControlMode::Batch, &[], &[], &["inner"], &[]),
            decl("inner", &[("x", InputLocator::BatchInjected)], &["y"]),
        ]);
        let err = build_stack(&catalog).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Unschedulable {
                pending: vec!["batch".into()]
            }
        );
    }

    #[test]
    fn test_shared_sub_operation_is_rejected() {
        let catalog = catalog_of(vec![
            controller_decl("b1", ControlMode::Batch, &[], &[], &["x"], &[]),
            controller_decl("b2", ControlMode::Realtime, &[], &[], &["x"], &[]),
            decl("x", &[], &[]),
        ]);
        assert_eq!(
            build_stack(&catalog).unwrap_err(),
            ScheduleError::SharedSubOperation {
                uri: "x".into(),
                first: "b1".into(),
                second: "b2".into()
            }
        );
    }

    #[test]
    fn test_sub_operation_listed_twice_names_its_controller() {
        let catalog = catalog_of(vec![
            controller_decl("batch", ControlMode::Batch, &[], &[], &["x", "x"], &[]),
            decl("x", &[], &[]),
        ]);
        assert_eq!(
            build_stack(&catalog).unwrap_err(),
            ScheduleError::DuplicateSubOperation {
                uri: "x".into(),
                controller: "batch".into()
            }
        );
    }

    #[test]
    fn test_unknown_sub_operation_is_structural() {
        let catalog = catalog_of(vec![controller_decl(
            "b1",
            ControlMode::Batch,
            &[],
            &[],
            &["ghost"],
            &[],
        )]);
        assert_eq!(
            build_stack(&catalog).unwrap_err(),
            ScheduleError::Structural(StructuralError::NotFound("ghost".into()))
        );
    }

    #[test]
    fn test_claim_cycle_is_unschedulable() {
        let catalog = catalog_of(vec![
            controller_decl("b1", ControlMode::Batch, &[], &[], &["b2"], &[]),
            controller_decl("b2", ControlMode::Batch, &[], &[], &["b1"], &[]),
        ]);
        assert!(matches!(
            build_stack(&catalog),
            Err(ScheduleError::Unschedulable { .. })
        ));
    }

    #[test]
    fn test_display_outline() {
        let catalog = catalog_of(vec![
            controller_decl("batch", ControlMode::Batch, &[], &[], &["add"], &["add.inputs.a"]),
            decl("add", &[("a", InputLocator::BatchInjected)], &["result"]),
        ]);
        let stack = build_stack(&catalog).unwrap();
        assert_eq!(stack.to_string(), "0: batch [batch]\n  0: add\n");
    }

    #[test]
    fn test_controller_inside_controller() {
        let catalog = catalog_of(vec![
            controller_decl(
                "outer",
                ControlMode::Batch,
                &[("values", InputLocator::literal(LiteralType::Array, "[[1]]"))],
                &["batch_outputs"],
                &["inner"],
                &["inner.inputs.values"],
            ),
            controller_decl(
                "inner",
                ControlMode::Batch,
                &[("values", InputLocator::BatchInjected)],
                &["batch_outputs"],
                &["add"],
                &["add.inputs.a"],
            ),
            decl("add", &[("a", InputLocator::BatchInjected)], &["result"]),
            decl("select", &[("x", InputLocator::workflow("outer.outputs.batch_outputs"))], &["y"]),
        ]);
        let stack = build_stack(&catalog).unwrap();

        assert_eq!(
            stack.outline(),
            vec![
                (0, 0, "outer [batch]".to_string()),
                (1, 0, "inner [batch]".to_string()),
                (2, 0, "add".to_string()),
                (0, 1, "select".to_string()),
            ]
        );
        assert_eq!(stack.operations(), vec!["outer", "inner", "add", "select"]);
    }
}
