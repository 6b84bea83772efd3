//! attrsync - Attribute projection and convergence polling
//!
//! Building blocks for managing resources on eventually consistent remote
//! APIs: a typed projection between local resource data and the flat
//! string attribute bags such APIs speak, and polling primitives that
//! wait out propagation windows after create, update and delete.

// Core modules
pub mod context;
pub mod error;
pub mod projection;
pub mod types;

// Polling modules
pub mod poll;
pub mod propagation;
pub mod retry;

// Re-exports for convenience
pub use context::Context;
pub use error::{BoxError, ProjectionError, Result};
pub use poll::{ConvergencePoller, PollConfig, PollResult, StateSource, WaitError};
pub use projection::{AttributeSpec, ProjectionTable, ProjectionTableBuilder};
pub use propagation::{attributes_match, wait_attributes_propagated, wait_removed};
pub use retry::{retry_when, OnTimeout, RetryConfig, RetryError};
pub use types::{AttrKind, AttrValue, RemoteAttributes, ResourceData};
