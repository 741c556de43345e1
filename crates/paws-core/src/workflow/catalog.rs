//! Point-in-time snapshot of the operations the scheduler works over.
//!
//! Stack building is a pure function; it reads a [`Catalog`] instead of the
//! live tree so one build sees one consistent state.

use std::collections::{HashMap, HashSet};

use paws_types::binding::ControlMode;
use paws_types::error::StructuralError;
use paws_types::locator::InputLocator;

use crate::tree::ItemTree;

#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub name: String,
    /// `<operation>.inputs.<name>`
    pub uri: String,
    pub locator: InputLocator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDecl {
    pub mode: ControlMode,
    pub sub_operations: Vec<String>,
    pub routes: Vec<String>,
}

/// One operation as the scheduler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDecl {
    pub uri: String,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<String>,
    pub control: Option<ControlDecl>,
}

impl OpDecl {
    pub fn is_controller(&self) -> bool {
        self.control.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    ops: Vec<OpDecl>,
    index: HashMap<String, usize>,
    static_uris: HashSet<String>,
}

impl Catalog {
    /// Snapshots every top-level operation of `tree` under one read lock.
    pub fn from_tree(tree: &ItemTree) -> Result<Self, StructuralError> {
        let view = tree.scheduling_view()?;
        let mut catalog = Catalog::default();
        for (uri, op, slots) in view.operations {
            let inputs = slots
                .into_iter()
                .map(|(slot, locator)| InputDecl {
                    name: slot.rsplit('.').next().unwrap_or_default().to_string(),
                    uri: slot,
                    locator,
                })
                .collect();
            let control = op.control_mode().map(|mode| ControlDecl {
                mode,
                sub_operations: op.sub_operation_uris(),
                routes: op.input_routes(),
            });
            catalog.push(OpDecl {
                uri,
                inputs,
                outputs: op.output_names(),
                control,
            });
        }
        catalog.static_uris = view.static_uris.into_iter().collect();
        Ok(catalog)
    }

    pub fn push(&mut self, decl: OpDecl) {
        self.index.insert(decl.uri.clone(), self.ops.len());
        self.ops.push(decl);
    }

    pub fn with_static_uris(mut self, uris: impl IntoIterator<Item = String>) -> Self {
        self.static_uris.extend(uris);
        self
    }

    pub fn get(&self, uri: &str) -> Option<&OpDecl> {
        self.index.get(uri).map(|&i| &self.ops[i])
    }

    /// Operations in declaration order.
    pub fn ops(&self) -> &[OpDecl] {
        &self.ops
    }

    pub fn static_uris(&self) -> &HashSet<String> {
        &self.static_uris
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
