//! Error types for attrsync

use crate::types::AttrKind;

/// Boxed error produced by caller-supplied fetch operations.
///
/// The crate is agnostic to the adapter's transport, so the fetch seam
/// carries whatever error type the adapter's client produces.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for projection operations
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Invalid remote value {value:?} for attribute {name}: expected {kind}")]
    InvalidRemoteValue {
        name: String,
        value: String,
        kind: AttrKind,
    },

    #[error("Type mismatch for attribute {name}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: AttrKind,
        actual: AttrKind,
    },

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Duplicate projection entry: {0}")]
    DuplicateAttribute(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for projection operations
pub type Result<T> = std::result::Result<T, ProjectionError>;
