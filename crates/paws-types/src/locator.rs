//! Input locator declarations.
//!
//! An `InputLocator` states *where* an input slot's value comes from; it is a
//! declaration, not a resolution. Each source kind is its own variant so the
//! resolver dispatches with an exhaustive match:
//!
//! ```json
//! { "source": "literal-text", "type": "int", "raw": "42" }
//! { "source": "workflow-reference", "mode": "reference", "raw": "integrate.outputs.q" }
//! { "source": "batch-injected" }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// The raw text of a locator: one string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    One(String),
    Many(Vec<String>),
}

impl RawValue {
    /// All raw strings in declaration order.
    pub fn items(&self) -> Vec<&str> {
        match self {
            RawValue::One(s) => vec![s.as_str()],
            RawValue::Many(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, RawValue::Many(_))
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::One(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::One(s)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(items: Vec<String>) -> Self {
        RawValue::Many(items)
    }
}

impl From<Vec<&str>> for RawValue {
    fn from(items: Vec<&str>) -> Self {
        RawValue::Many(items.into_iter().map(String::from).collect())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::One(s) => write!(f, "{s}"),
            RawValue::Many(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

// ---------------------------------------------------------------------------
// Types and modes
// ---------------------------------------------------------------------------

/// Target type for literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    Int,
    Float,
    String,
    Boolean,
    Array,
}

impl fmt::Display for LiteralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LiteralType::Int => "int",
            LiteralType::Float => "float",
            LiteralType::String => "string",
            LiteralType::Boolean => "boolean",
            LiteralType::Array => "array",
        };
        f.write_str(name)
    }
}

/// How a reference is interpreted: the live payload, or the address as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    #[default]
    Reference,
    Path,
}

// ---------------------------------------------------------------------------
// InputLocator
// ---------------------------------------------------------------------------

/// Declared source of one input slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum InputLocator {
    /// No input; resolves to absent.
    #[default]
    None,
    /// Text typed by a user, cast to `ty` at resolution time.
    LiteralText {
        #[serde(rename = "type")]
        ty: LiteralType,
        raw: RawValue,
    },
    /// A uri in the workflow's item tree.
    WorkflowReference {
        #[serde(default)]
        mode: ReferenceMode,
        raw: RawValue,
    },
    /// A uri in the external plugin registry.
    PluginReference {
        #[serde(default)]
        mode: ReferenceMode,
        raw: RawValue,
    },
    /// A filesystem path, passed through as text.
    FilesystemPath { raw: RawValue },
    /// Supplied per iteration by a batch or realtime controller.
    BatchInjected,
}

impl InputLocator {
    pub fn literal(ty: LiteralType, raw: impl Into<RawValue>) -> Self {
        InputLocator::LiteralText { ty, raw: raw.into() }
    }

    /// A live workflow reference to one or more uris.
    pub fn workflow(raw: impl Into<RawValue>) -> Self {
        InputLocator::WorkflowReference {
            mode: ReferenceMode::Reference,
            raw: raw.into(),
        }
    }

    pub fn plugin(raw: impl Into<RawValue>) -> Self {
        InputLocator::PluginReference {
            mode: ReferenceMode::Reference,
            raw: raw.into(),
        }
    }

    pub fn path(raw: impl Into<RawValue>) -> Self {
        InputLocator::FilesystemPath { raw: raw.into() }
    }

    /// Stable name of the source kind.
    pub fn source_kind(&self) -> &'static str {
        match self {
            InputLocator::None => "none",
            InputLocator::LiteralText { .. } => "literal-text",
            InputLocator::WorkflowReference { .. } => "workflow-reference",
            InputLocator::PluginReference { .. } => "plugin-reference",
            InputLocator::FilesystemPath { .. } => "filesystem-path",
            InputLocator::BatchInjected => "batch-injected",
        }
    }

    /// Tree uris this locator depends on (empty unless a workflow reference).
    pub fn workflow_uris(&self) -> Vec<&str> {
        match self {
            InputLocator::WorkflowReference { raw, .. } => raw.items(),
            _ => Vec::new(),
        }
    }

    pub fn is_batch_injected(&self) -> bool {
        matches!(self, InputLocator::BatchInjected)
    }
}

impl fmt::Display for InputLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLocator::None | InputLocator::BatchInjected => f.write_str(self.source_kind()),
            InputLocator::LiteralText { ty, raw } => write!(f, "literal-text({ty}: {raw})"),
            InputLocator::WorkflowReference { raw, .. }
            | InputLocator::PluginReference { raw, .. }
            | InputLocator::FilesystemPath { raw } => write!(f, "{}({raw})", self.source_kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_locator_json_shape() {
        let loc = InputLocator::literal(LiteralType::Int, "42");
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["source"], "literal-text");
        assert_eq!(json["type"], "int");
        assert_eq!(json["raw"], "42");
    }

    #[test]
    fn test_reference_mode_defaults_to_reference() {
        let loc: InputLocator = serde_json::from_str(
            r#"{ "source": "workflow-reference", "raw": ["a.outputs.x", "b.outputs.y"] }"#,
        )
        .unwrap();
        assert_eq!(loc.workflow_uris(), vec!["a.outputs.x", "b.outputs.y"]);
        assert!(matches!(
            loc,
            InputLocator::WorkflowReference {
                mode: ReferenceMode::Reference,
                ..
            }
        ));
    }

    #[test]
    fn test_only_workflow_references_have_uris() {
        assert!(InputLocator::plugin("detector.geometry").workflow_uris().is_empty());
        assert!(InputLocator::path("/data/img.tif").workflow_uris().is_empty());
        assert!(InputLocator::BatchInjected.workflow_uris().is_empty());
        assert!(InputLocator::BatchInjected.is_batch_injected());
    }

    #[test]
    fn test_display() {
        assert_eq!(InputLocator::None.to_string(), "none");
        assert_eq!(
            InputLocator::literal(LiteralType::Float, vec!["1.5", "2"]).to_string(),
            "literal-text(float: [1.5, 2])"
        );
        assert_eq!(
            InputLocator::workflow("read.outputs.image").to_string(),
            "workflow-reference(read.outputs.image)"
        );
    }
}
