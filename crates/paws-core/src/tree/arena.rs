//! Arena storage behind [`ItemTree`](super::ItemTree).
//!
//! Nodes live in a `Vec<Option<Node>>`. Removal empties a slot and the slot
//! is never reused, so a [`NodeHandle`] either reaches the node it was issued
//! for or nothing at all.

use paws_types::error::StructuralError;
use serde_json::{Map, Value};

use super::{NodeHandle, Payload};

pub(crate) const ROOT: NodeHandle = NodeHandle(0);

#[derive(Debug)]
pub(crate) struct Node {
    pub tag: String,
    pub parent: Option<NodeHandle>,
    pub children: Vec<NodeHandle>,
    pub payload: Payload,
}

#[derive(Debug)]
pub(crate) struct TreeArena {
    nodes: Vec<Option<Node>>,
}

impl Default for TreeArena {
    fn default() -> Self {
        let root = Node {
            tag: String::new(),
            parent: None,
            children: Vec::new(),
            payload: Payload::Empty,
        };
        Self {
            nodes: vec![Some(root)],
        }
    }
}

pub(crate) fn validate_tag(tag: &str) -> Result<(), StructuralError> {
    if tag.is_empty() || tag.contains('.') {
        return Err(StructuralError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

impl TreeArena {
    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Walks `uri` from the root. The empty uri is the root itself.
    pub fn lookup(&self, uri: &str) -> Option<NodeHandle> {
        if uri.is_empty() {
            return Some(ROOT);
        }
        uri.split('.')
            .try_fold(ROOT, |handle, segment| self.child_by_tag(handle, segment))
    }

    pub fn require(&self, uri: &str) -> Result<NodeHandle, StructuralError> {
        self.lookup(uri)
            .ok_or_else(|| StructuralError::NotFound(uri.to_string()))
    }

    pub fn child_by_tag(&self, parent: NodeHandle, tag: &str) -> Option<NodeHandle> {
        self.node(parent)?
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).is_some_and(|n| n.tag == tag))
    }

    pub fn uri_of(&self, handle: NodeHandle) -> Option<String> {
        let mut tags = Vec::new();
        let mut current = handle;
        loop {
            let node = self.node(current)?;
            match node.parent {
                Some(parent) => {
                    tags.push(node.tag.as_str());
                    current = parent;
                }
                None => break,
            }
        }
        tags.reverse();
        Some(tags.join("."))
    }

    pub fn insert(
        &mut self,
        parent: NodeHandle,
        tag: &str,
        payload: Payload,
    ) -> Result<NodeHandle, StructuralError> {
        validate_tag(tag)?;
        if self.node(parent).is_none() {
            return Err(StructuralError::NotFound(format!("#{}", parent.0)));
        }
        if self.child_by_tag(parent, tag).is_some() {
            let parent_uri = self.uri_of(parent).unwrap_or_default();
            return Err(StructuralError::DuplicateTag {
                parent: display_uri(&parent_uri),
                tag: tag.to_string(),
            });
        }

        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(Some(Node {
            tag: tag.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            payload,
        }));
        if let Some(p) = self.node_mut(parent) {
            p.children.push(handle);
        }
        Ok(handle)
    }

    /// Detaches `handle` from its parent and frees its whole subtree.
    pub fn remove_subtree(&mut self, handle: NodeHandle) {
        let parent = self.node(handle).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.node_mut(p)) {
            p.children.retain(|&c| c != handle);
        }
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(h.0).and_then(Option::take) {
                stack.extend(node.children);
            }
        }
    }

    /// Renders a node as JSON.
    ///
    /// Value payloads render as themselves and input slots as their loaded
    /// value. Grouping and operation nodes render as an object of their
    /// children.
    pub fn render(&self, handle: NodeHandle) -> Option<Value> {
        let node = self.node(handle)?;
        let value = match &node.payload {
            Payload::Value(v) => v.clone(),
            Payload::Input(slot) => slot.value.clone(),
            Payload::Empty | Payload::Operation(_) => {
                let mut map = Map::new();
                for &child in &node.children {
                    if let (Some(c), Some(v)) = (self.node(child), self.render(child)) {
                        map.insert(c.tag.clone(), v);
                    }
                }
                Value::Object(map)
            }
        };
        Some(value)
    }

    /// Handles of every live descendant of `handle`, depth first.
    pub fn descendants(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeHandle> = match self.node(handle) {
            Some(n) => n.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(h) = stack.pop() {
            if let Some(node) = self.node(h) {
                out.push(h);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

pub(crate) fn display_uri(uri: &str) -> String {
    if uri.is_empty() {
        "<root>".to_string()
    } else {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_lookup_and_uri() {
        let mut arena = TreeArena::default();
        let a = arena.insert(ROOT, "a", Payload::Empty).unwrap();
        let b = arena.insert(a, "b", Payload::Value(json!(1))).unwrap();

        assert_eq!(arena.lookup("a.b"), Some(b));
        assert_eq!(arena.uri_of(b).unwrap(), "a.b");
        assert_eq!(arena.uri_of(ROOT).unwrap(), "");
        assert_eq!(arena.lookup("a.c"), None);
    }

    #[test]
    fn test_removed_slots_are_not_reused() {
        let mut arena = TreeArena::default();
        let a = arena.insert(ROOT, "a", Payload::Empty).unwrap();
        arena.insert(a, "x", Payload::Empty).unwrap();
        arena.remove_subtree(a);

        let again = arena.insert(ROOT, "a", Payload::Empty).unwrap();
        assert_ne!(a, again);
        assert!(arena.node(a).is_none());
        assert_eq!(arena.lookup("a.x"), None);
    }

    #[test]
    fn test_render_groups_children() {
        let mut arena = TreeArena::default();
        let g = arena.insert(ROOT, "g", Payload::Empty).unwrap();
        arena.insert(g, "x", Payload::Value(json!(1))).unwrap();
        arena.insert(g, "y", Payload::Value(json!("two"))).unwrap();

        assert_eq!(arena.render(g).unwrap(), json!({ "x": 1, "y": "two" }));
    }

    #[test]
    fn test_descendants_depth_first() {
        let mut arena = TreeArena::default();
        let g = arena.insert(ROOT, "g", Payload::Empty).unwrap();
        let h = arena.insert(g, "h", Payload::Empty).unwrap();
        let x = arena.insert(h, "x", Payload::Empty).unwrap();
        let y = arena.insert(g, "y", Payload::Empty).unwrap();
        assert_eq!(arena.descendants(g), vec![h, x, y]);
    }
}
