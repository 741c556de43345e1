//! The item tree: hierarchical store of operations, their slots, and data.
//!
//! Every node has a tag unique among its siblings; joining tags from the root
//! with `.` gives the node's uri (`integrate.outputs.q`). Adding an operation
//! creates its slot children in one step:
//!
//! ```text
//! integrate                 Operation
//! ├── inputs                Empty
//! │   ├── image             Input { locator, value }
//! │   └── mask              Input { locator, value }
//! └── outputs               Empty
//!     └── q                 Value
//! ```
//!
//! [`ItemTree`] is a cheap-to-clone handle around one lock. The lock is a
//! `std::sync::RwLock` and is only held for the duration of a single call,
//! never across an await and never while an operation body runs. Every
//! mutation is announced as a [`TreeEvent`] on a broadcast channel.

mod arena;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use paws_types::error::StructuralError;
use paws_types::event::TreeEvent;
use paws_types::locator::InputLocator;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::operation::OperationKind;

use arena::{ROOT, TreeArena, validate_tag};

/// Default capacity of the tree event channel.
pub const DEFAULT_TREE_EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// Stable arena index of a node. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An operation input slot: where the value comes from, and the value most
/// recently loaded into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSlot {
    pub locator: InputLocator,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub enum Payload {
    /// Grouping node.
    Empty,
    Value(Value),
    Input(InputSlot),
    Operation(OperationKind),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Empty => PayloadKind::Empty,
            Payload::Value(_) => PayloadKind::Value,
            Payload::Input(_) => PayloadKind::Input,
            Payload::Operation(_) => PayloadKind::Operation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Empty,
    Value,
    Input,
    Operation,
}

/// Read-only summary of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub tag: String,
    pub uri: String,
    pub kind: PayloadKind,
    pub children: Vec<String>,
}

/// An input slot whose workflow reference points at a missing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenReference {
    pub slot: String,
    pub target: String,
}

// ---------------------------------------------------------------------------
// ItemTree
// ---------------------------------------------------------------------------

/// Shared handle to the workflow's item tree.
#[derive(Clone)]
pub struct ItemTree {
    inner: Arc<RwLock<TreeArena>>,
    events: broadcast::Sender<TreeEvent>,
}

impl Default for ItemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ItemTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemTree")
            .field("top_level", &self.top_level_uris())
            .finish()
    }
}

impl ItemTree {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_TREE_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(TreeArena::default())),
            events,
        }
    }

    /// Receiver for every future mutation of this tree.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeArena> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeArena> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, event: TreeEvent) {
        let _ = self.events.send(event);
    }

    // -- mutation ------------------------------------------------------------

    /// Adds a node under `parent_uri` (empty for the root) and returns its uri.
    pub fn add_node(
        &self,
        parent_uri: &str,
        tag: &str,
        payload: Payload,
    ) -> Result<String, StructuralError> {
        let uri = {
            let mut arena = self.write();
            let parent = arena.require(parent_uri)?;
            arena.insert(parent, tag, payload)?;
            join_uri(parent_uri, tag)
        };
        self.announce(TreeEvent::NodeAdded { uri: uri.clone() });
        Ok(uri)
    }

    /// Adds an operation at the top level with its `inputs` and `outputs`
    /// slot children. Nothing is inserted if any slot name is invalid.
    pub fn add_operation(&self, tag: &str, op: OperationKind) -> Result<String, StructuralError> {
        let input_names = op.input_names();
        let output_names = op.output_names();
        validate_tag(tag)?;
        for names in [&input_names, &output_names] {
            let mut seen = HashSet::new();
            for name in names {
                validate_tag(name)?;
                if !seen.insert(name.as_str()) {
                    return Err(StructuralError::DuplicateTag {
                        parent: tag.to_string(),
                        tag: name.clone(),
                    });
                }
            }
        }

        {
            let mut arena = self.write();
            let op_handle = arena.insert(ROOT, tag, Payload::Operation(op))?;
            let inputs = arena.insert(op_handle, "inputs", Payload::Empty)?;
            for name in &input_names {
                arena.insert(inputs, name, Payload::Input(InputSlot::default()))?;
            }
            let outputs = arena.insert(op_handle, "outputs", Payload::Empty)?;
            for name in &output_names {
                arena.insert(outputs, name, Payload::Value(Value::Null))?;
            }
        }

        tracing::debug!(uri = tag, "operation added");
        self.announce(TreeEvent::NodeAdded {
            uri: tag.to_string(),
        });
        Ok(tag.to_string())
    }

    /// Removes the node at `uri` and its whole subtree.
    pub fn remove(&self, uri: &str) -> Result<(), StructuralError> {
        if uri.is_empty() {
            return Err(StructuralError::RootRemoval);
        }
        {
            let mut arena = self.write();
            let handle = arena.require(uri)?;
            arena.remove_subtree(handle);
        }
        self.announce(TreeEvent::NodeRemoved {
            uri: uri.to_string(),
        });
        Ok(())
    }

    /// Replaces the locator of an input slot.
    pub fn set_locator(&self, slot_uri: &str, locator: InputLocator) -> Result<(), StructuralError> {
        {
            let mut arena = self.write();
            let handle = arena.require(slot_uri)?;
            match arena.node_mut(handle).map(|n| &mut n.payload) {
                Some(Payload::Input(slot)) => slot.locator = locator,
                _ => return Err(StructuralError::NotAnInputSlot(slot_uri.to_string())),
            }
        }
        self.announce(TreeEvent::LocatorChanged {
            uri: slot_uri.to_string(),
        });
        Ok(())
    }

    /// Replaces the value held at `uri`.
    ///
    /// Works on value nodes (including output slots) and on input slots,
    /// where it sets the loaded value and leaves the locator alone.
    pub fn set_value(&self, uri: &str, value: Value) -> Result<(), StructuralError> {
        {
            let mut arena = self.write();
            let handle = arena.require(uri)?;
            match arena.node_mut(handle).map(|n| &mut n.payload) {
                Some(Payload::Value(v)) => *v = value,
                Some(Payload::Input(slot)) => slot.value = value,
                _ => return Err(StructuralError::NotAValue(uri.to_string())),
            }
        }
        self.announce(TreeEvent::ValueChanged {
            uri: uri.to_string(),
        });
        Ok(())
    }

    /// Sets the loaded value of an operation input.
    ///
    /// `uri` must have exactly the form `<operation>.inputs.<name>`.
    pub fn set_input_at_uri(&self, uri: &str, value: Value) -> Result<(), StructuralError> {
        let not_slot = || StructuralError::NotAnInputSlot(uri.to_string());
        let mut parts = uri.split('.');
        let (Some(op_tag), Some("inputs"), Some(_name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(not_slot());
        };

        {
            let mut arena = self.write();
            let op = arena.require(op_tag)?;
            if !matches!(arena.node(op).map(|n| &n.payload), Some(Payload::Operation(_))) {
                return Err(StructuralError::NotAnOperation(op_tag.to_string()));
            }
            let handle = arena.require(uri)?;
            match arena.node_mut(handle).map(|n| &mut n.payload) {
                Some(Payload::Input(slot)) => slot.value = value,
                _ => return Err(not_slot()),
            }
        }
        self.announce(TreeEvent::ValueChanged {
            uri: uri.to_string(),
        });
        Ok(())
    }

    // -- lookup --------------------------------------------------------------

    pub fn contains(&self, uri: &str) -> bool {
        self.read().lookup(uri).is_some()
    }

    pub fn get(&self, uri: &str) -> Result<NodeView, StructuralError> {
        let arena = self.read();
        let handle = arena.require(uri)?;
        let node = arena
            .node(handle)
            .ok_or_else(|| StructuralError::NotFound(uri.to_string()))?;
        let children = node
            .children
            .iter()
            .filter_map(|&c| arena.node(c))
            .map(|c| join_uri(uri, &c.tag))
            .collect();
        Ok(NodeView {
            tag: node.tag.clone(),
            uri: uri.to_string(),
            kind: node.payload.kind(),
            children,
        })
    }

    /// Uris of the children of `uri`, in insertion order.
    pub fn children(&self, uri: &str) -> Result<Vec<String>, StructuralError> {
        self.get(uri).map(|view| view.children)
    }

    pub fn top_level_uris(&self) -> Vec<String> {
        self.children("").unwrap_or_default()
    }

    pub fn handle(&self, uri: &str) -> Result<NodeHandle, StructuralError> {
        self.read().require(uri)
    }

    /// Current rendered value of the node behind `handle`.
    pub fn value_of(&self, handle: NodeHandle) -> Result<Value, StructuralError> {
        self.read()
            .render(handle)
            .ok_or_else(|| StructuralError::NotFound(handle.to_string()))
    }

    /// Current rendered value of the node at `uri`.
    pub fn value_at(&self, uri: &str) -> Result<Value, StructuralError> {
        let arena = self.read();
        let handle = arena.require(uri)?;
        arena
            .render(handle)
            .ok_or_else(|| StructuralError::NotFound(uri.to_string()))
    }

    pub fn locator_at(&self, slot_uri: &str) -> Result<InputLocator, StructuralError> {
        let arena = self.read();
        let handle = arena.require(slot_uri)?;
        match arena.node(handle).map(|n| &n.payload) {
            Some(Payload::Input(slot)) => Ok(slot.locator.clone()),
            _ => Err(StructuralError::NotAnInputSlot(slot_uri.to_string())),
        }
    }

    pub fn operation(&self, uri: &str) -> Result<OperationKind, StructuralError> {
        let arena = self.read();
        let handle = arena.require(uri)?;
        match arena.node(handle).map(|n| &n.payload) {
            Some(Payload::Operation(op)) => Ok(op.clone()),
            _ => Err(StructuralError::NotAnOperation(uri.to_string())),
        }
    }

    /// Top-level operations in declaration order.
    pub fn operations(&self) -> Vec<(String, OperationKind)> {
        operations_in(&self.read())
    }

    /// Uris of every node inside top-level subtrees that are not operations.
    ///
    /// These hold static data and count as available before anything runs.
    pub fn static_data_uris(&self) -> Vec<String> {
        static_data_uris_in(&self.read())
    }

    /// Input slots of top-level operations, as `(slot uri, locator)` pairs,
    /// in declaration order.
    pub fn input_slots(&self, op_uri: &str) -> Result<Vec<(String, InputLocator)>, StructuralError> {
        input_slots_in(&self.read(), op_uri)
    }

    /// Operations with their input slots, plus the static data uris, read
    /// under a single lock.
    pub fn scheduling_view(&self) -> Result<SchedulingView, StructuralError> {
        let arena = self.read();
        let operations = operations_in(&arena)
            .into_iter()
            .map(|(uri, op)| {
                let slots = input_slots_in(&arena, &uri)?;
                Ok((uri, op, slots))
            })
            .collect::<Result<_, StructuralError>>()?;
        Ok(SchedulingView {
            operations,
            static_uris: static_data_uris_in(&arena),
        })
    }

    /// Input slots whose workflow references no longer resolve.
    pub fn broken_references(&self) -> Vec<BrokenReference> {
        let mut broken = Vec::new();
        for (op_uri, _) in self.operations() {
            let Ok(slots) = self.input_slots(&op_uri) else {
                continue;
            };
            for (slot, locator) in slots {
                for target in locator.workflow_uris() {
                    if !self.contains(target) {
                        broken.push(BrokenReference {
                            slot: slot.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }
        broken
    }
}

/// Joins a parent uri and a child tag.
pub fn join_uri(parent: &str, tag: &str) -> String {
    if parent.is_empty() {
        tag.to_string()
    } else {
        format!("{parent}.{tag}")
    }
}

/// What the scheduler reads from the tree in one go.
#[derive(Debug, Clone)]
pub struct SchedulingView {
    /// `(uri, operation, input slots)` in declaration order.
    pub operations: Vec<(String, OperationKind, Vec<(String, InputLocator)>)>,
    pub static_uris: Vec<String>,
}

fn operations_in(arena: &TreeArena) -> Vec<(String, OperationKind)> {
    let Some(root) = arena.node(ROOT) else {
        return Vec::new();
    };
    root.children
        .iter()
        .filter_map(|&c| arena.node(c))
        .filter_map(|node| match &node.payload {
            Payload::Operation(op) => Some((node.tag.clone(), op.clone())),
            _ => None,
        })
        .collect()
}

fn static_data_uris_in(arena: &TreeArena) -> Vec<String> {
    let Some(root) = arena.node(ROOT) else {
        return Vec::new();
    };
    let mut uris = Vec::new();
    for &child in &root.children {
        let is_data = arena
            .node(child)
            .is_some_and(|n| !matches!(n.payload, Payload::Operation(_)));
        if !is_data {
            continue;
        }
        for handle in std::iter::once(child).chain(arena.descendants(child)) {
            if let Some(uri) = arena.uri_of(handle) {
                uris.push(uri);
            }
        }
    }
    uris
}

fn input_slots_in(
    arena: &TreeArena,
    op_uri: &str,
) -> Result<Vec<(String, InputLocator)>, StructuralError> {
    let op = arena.require(op_uri)?;
    if !matches!(arena.node(op).map(|n| &n.payload), Some(Payload::Operation(_))) {
        return Err(StructuralError::NotAnOperation(op_uri.to_string()));
    }
    let Some(inputs) = arena.child_by_tag(op, "inputs") else {
        return Ok(Vec::new());
    };
    let slots = arena
        .node(inputs)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    Ok(slots
        .into_iter()
        .filter_map(|h| arena.node(h))
        .filter_map(|n| match &n.payload {
            Payload::Input(slot) => Some((
                format!("{op_uri}.inputs.{}", n.tag),
                slot.locator.clone(),
            )),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Arithmetic;
    use paws_types::locator::LiteralType;
    use serde_json::json;

    fn tree_with_add() -> ItemTree {
        let tree = ItemTree::new();
        tree.add_operation("add", OperationKind::plain(Arithmetic::add()))
            .unwrap();
        tree
    }

    #[test]
    fn test_add_operation_creates_slots() {
        let tree = tree_with_add();
        assert_eq!(
            tree.children("add").unwrap(),
            vec!["add.inputs".to_string(), "add.outputs".to_string()]
        );
        assert_eq!(
            tree.children("add.inputs").unwrap(),
            vec!["add.inputs.a".to_string(), "add.inputs.b".to_string()]
        );
        assert_eq!(tree.get("add.inputs.a").unwrap().kind, PayloadKind::Input);
        assert_eq!(tree.get("add.outputs.result").unwrap().kind, PayloadKind::Value);
        assert_eq!(tree.locator_at("add.inputs.a").unwrap(), InputLocator::None);
    }

    #[test]
    fn test_duplicate_and_invalid_tags() {
        let tree = tree_with_add();
        let err = tree
            .add_operation("add", OperationKind::plain(Arithmetic::sub()))
            .unwrap_err();
        assert_eq!(
            err,
            StructuralError::DuplicateTag {
                parent: "<root>".into(),
                tag: "add".into()
            }
        );
        assert_eq!(
            tree.add_node("", "a.b", Payload::Empty).unwrap_err(),
            StructuralError::InvalidTag("a.b".into())
        );
        assert_eq!(
            tree.add_node("", "", Payload::Empty).unwrap_err(),
            StructuralError::InvalidTag(String::new())
        );
        assert_eq!(
            tree.add_node("nowhere", "x", Payload::Empty).unwrap_err(),
            StructuralError::NotFound("nowhere".into())
        );
    }

    #[test]
    fn test_remove_subtree_and_stale_handle() {
        let tree = tree_with_add();
        let handle = tree.handle("add.outputs.result").unwrap();
        tree.remove("add").unwrap();

        assert!(!tree.contains("add"));
        assert!(!tree.contains("add.outputs.result"));
        assert!(tree.value_of(handle).is_err());

        // Re-adding under the same tag yields a fresh handle.
        let tree2 = tree.clone();
        tree2
            .add_operation("add", OperationKind::plain(Arithmetic::add()))
            .unwrap();
        assert_ne!(tree2.handle("add.outputs.result").unwrap(), handle);
        assert!(tree.value_of(handle).is_err());
        assert_eq!(tree.remove(""), Err(StructuralError::RootRemoval));
    }

    #[test]
    fn test_value_at_renders_operation() {
        let tree = tree_with_add();
        tree.set_input_at_uri("add.inputs.a", json!(1)).unwrap();
        tree.set_value("add.outputs.result", json!(3)).unwrap();
        assert_eq!(
            tree.value_at("add").unwrap(),
            json!({
                "inputs": { "a": 1, "b": null },
                "outputs": { "result": 3 }
            })
        );
    }

    #[test]
    fn test_set_input_at_uri_requires_slot_form() {
        let tree = tree_with_add();
        tree.add_node("", "data", Payload::Empty).unwrap();
        tree.add_node("data", "x", Payload::Value(json!(0))).unwrap();

        assert!(tree.set_input_at_uri("add.inputs.a", json!(5)).is_ok());
        assert_eq!(tree.value_at("add.inputs.a").unwrap(), json!(5));

        assert_eq!(
            tree.set_input_at_uri("add.inputs", json!(5)),
            Err(StructuralError::NotAnInputSlot("add.inputs".into()))
        );
        assert_eq!(
            tree.set_input_at_uri("add.outputs.result", json!(5)),
            Err(StructuralError::NotAnInputSlot("add.outputs.result".into()))
        );
        assert_eq!(
            tree.set_input_at_uri("add.inputs.a.0", json!(5)),
            Err(StructuralError::NotAnInputSlot("add.inputs.a.0".into()))
        );
        assert!(matches!(
            tree.set_input_at_uri("add.inputs.zzz", json!(5)),
            Err(StructuralError::NotFound(_))
        ));
    }

    #[test]
    fn test_mutations_are_announced() {
        let tree = ItemTree::new();
        let mut rx = tree.subscribe();

        tree.add_operation("add", OperationKind::plain(Arithmetic::add()))
            .unwrap();
        tree.set_locator("add.inputs.a", InputLocator::literal(LiteralType::Int, "1"))
            .unwrap();
        tree.set_value("add.outputs.result", json!(1)).unwrap();
        tree.remove("add").unwrap();

        let events: Vec<TreeEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                TreeEvent::NodeAdded { uri: "add".into() },
                TreeEvent::LocatorChanged { uri: "add.inputs.a".into() },
                TreeEvent::ValueChanged { uri: "add.outputs.result".into() },
                TreeEvent::NodeRemoved { uri: "add".into() },
            ]
        );
    }

    #[test]
    fn test_static_data_and_broken_references() {
        let tree = tree_with_add();
        tree.add_node("", "data", Payload::Empty).unwrap();
        tree.add_node("data", "x", Payload::Value(json!(2))).unwrap();
        tree.set_locator("add.inputs.a", InputLocator::workflow("data.x"))
            .unwrap();
        tree.set_locator("add.inputs.b", InputLocator::workflow("gone.outputs.y"))
            .unwrap();

        assert_eq!(
            tree.static_data_uris(),
            vec!["data".to_string(), "data.x".to_string()]
        );
        assert_eq!(
            tree.broken_references(),
            vec![BrokenReference {
                slot: "add.inputs.b".into(),
                target: "gone.outputs.y".into()
            }]
        );

        tree.remove("data").unwrap();
        assert_eq!(tree.broken_references().len(), 2);
    }

    #[test]
    fn test_scheduling_view_matches_single_accessors() {
        let tree = tree_with_add();
        tree.add_node("", "data", Payload::Empty).unwrap();
        tree.add_node("data", "x", Payload::Value(json!(2))).unwrap();
        tree.set_locator("add.inputs.a", InputLocator::workflow("data.x"))
            .unwrap();

        let view = tree.scheduling_view().unwrap();
        assert_eq!(view.static_uris, tree.static_data_uris());
        assert_eq!(view.operations.len(), 1);
        let (uri, _, slots) = &view.operations[0];
        assert_eq!(uri, "add");
        assert_eq!(slots, &tree.input_slots("add").unwrap());
    }

    #[test]
    fn test_operations_in_declaration_order() {
        let tree = tree_with_add();
        tree.add_node("", "data", Payload::Empty).unwrap();
        tree.add_operation("mul", OperationKind::plain(Arithmetic::mul()))
            .unwrap();
        let names: Vec<String> = tree.operations().into_iter().map(|(u, _)| u).collect();
        assert_eq!(names, vec!["add".to_string(), "mul".to_string()]);
        assert!(matches!(
            tree.operation("data"),
            Err(StructuralError::NotAnOperation(_))
        ));
    }
}
