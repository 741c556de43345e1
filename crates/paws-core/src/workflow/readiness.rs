//! Readiness of an operation against the set of already-scheduled uris.
//!
//! A workflow reference is satisfied as soon as the producing operation has
//! been placed in an earlier layer; layers run strictly one after another,
//! so the producer has always finished by the time the consumer starts.

use std::collections::HashSet;

use paws_types::locator::InputLocator;

use super::catalog::OpDecl;

/// True iff every input of `op` is satisfied.
///
/// Workflow references (either mode) need all their uris in `satisfied`;
/// batch-injected inputs need their own slot uri in `routes`. Every other
/// source kind is always ready.
pub fn is_ready(op: &OpDecl, satisfied: &HashSet<String>, routes: &HashSet<String>) -> bool {
    op.inputs.iter().all(|input| match &input.locator {
        InputLocator::WorkflowReference { .. } => input
            .locator
            .workflow_uris()
            .into_iter()
            .all(|uri| satisfied.contains(uri)),
        InputLocator::BatchInjected => routes.contains(&input.uri),
        InputLocator::None
        | InputLocator::LiteralText { .. }
        | InputLocator::PluginReference { .. }
        | InputLocator::FilesystemPath { .. } => true,
    })
}

/// Uris that become available once `op` is scheduled: the operation itself,
/// its `inputs`/`outputs` groups, and every slot under them.
pub fn contribution(op: &OpDecl) -> Vec<String> {
    let mut uris = Vec::with_capacity(3 + op.inputs.len() + op.outputs.len());
    uris.push(op.uri.clone());
    uris.push(format!("{}.inputs", op.uri));
    uris.push(format!("{}.outputs", op.uri));
    uris.extend(op.inputs.iter().map(|i| i.uri.clone()));
    uris.extend(op.outputs.iter().map(|o| format!("{}.outputs.{o}", op.uri)));
    uris
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::decl;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_literal_and_none_always_ready() {
        let op = decl(
            "a",
            &[
                ("x", InputLocator::literal(paws_types::locator::LiteralType::Int, "1")),
                ("y", InputLocator::None),
                ("z", InputLocator::plugin("cal.q")),
                ("w", InputLocator::path("/tmp/x")),
            ],
            &["out"],
        );
        assert!(is_ready(&op, &HashSet::new(), &HashSet::new()));
    }

    #[test]
    fn test_reference_needs_every_uri() {
        let op = decl(
            "b",
            &[("x", InputLocator::workflow(vec!["a.outputs.out", "c.outputs.out"]))],
            &[],
        );
        assert!(!is_ready(&op, &set(&["a.outputs.out"]), &HashSet::new()));
        assert!(is_ready(
            &op,
            &set(&["a.outputs.out", "c.outputs.out"]),
            &HashSet::new()
        ));
    }

    #[test]
    fn test_batch_injected_needs_route() {
        let op = decl("b", &[("x", InputLocator::BatchInjected)], &[]);
        assert!(!is_ready(&op, &HashSet::new(), &HashSet::new()));
        assert!(is_ready(&op, &HashSet::new(), &set(&["b.inputs.x"])));
    }

    #[test]
    fn test_contribution_lists_slots() {
        let op = decl("a", &[("x", InputLocator::None)], &["y"]);
        assert_eq!(
            contribution(&op),
            vec!["a", "a.inputs", "a.outputs", "a.inputs.x", "a.outputs.y"]
        );
    }
}
