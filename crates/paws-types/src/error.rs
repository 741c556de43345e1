use thiserror::Error;

use crate::locator::LiteralType;

/// Errors raised by item tree mutation and lookup.
///
/// A structural error means the configured workflow cannot execute as-is;
/// callers surface it and never retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("no node at uri '{0}'")]
    NotFound(String),

    #[error("tag '{tag}' already exists under '{parent}'")]
    DuplicateTag { parent: String, tag: String },

    #[error("invalid tag '{0}': tags must be non-empty and contain no '.'")]
    InvalidTag(String),

    #[error("broken reference: '{0}' no longer resolves")]
    BrokenReference(String),

    #[error("'{0}' is not an input slot (expected <operation>.inputs.<name>)")]
    NotAnInputSlot(String),

    #[error("'{0}' is not an operation")]
    NotAnOperation(String),

    #[error("'{0}' holds no value")]
    NotAValue(String),

    #[error("the root node cannot be removed")]
    RootRemoval,
}

/// Errors from an external plugin registry lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin item '{0}' not found")]
    NotFound(String),

    #[error("plugin registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while resolving an input locator into a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("cannot cast '{raw}' to {expected}: {reason}")]
    TypeCast {
        raw: String,
        expected: LiteralType,
        reason: String,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("batch-injected input '{0}' resolved outside batch or realtime execution")]
    BatchInjectedOutsideBatch(String),

    #[error("no batch binding for '{0}'")]
    MissingBinding(String),
}

impl ResolveError {
    /// True for failures caused by malformed literal text.
    pub fn is_type_cast(&self) -> bool {
        matches!(self, ResolveError::TypeCast { .. })
    }
}

/// Errors returned by an operation body.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OperationError {
    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    /// Shorthand for an `InvalidInput` error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        OperationError::InvalidInput {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from a message sink. Never fatal to execution.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink closed")]
    Closed,
}
