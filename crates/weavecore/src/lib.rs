//! Core abstractions for the weave workflow engine
//!
//! This crate provides the fundamental types and traits that the runtime
//! builds on: the dynamic [`Value`], the shared [`Context`], the [`Node`]
//! contract and the lifecycle event/observer system. Tokio is only used
//! for the broadcast channel behind [`EventBus`] and for cancellation
//! tokens; the crate never starts a runtime of its own.

mod context;
mod error;
pub mod events;
mod node;
mod value;

pub use context::Context;
pub use error::{BoxError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{
    node_fn, sync_node_fn, FnNode, Inputs, Node, NodeContext, NodeMetadata, NodeOutput,
    SyncFnNode, Usage,
};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
