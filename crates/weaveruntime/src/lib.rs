//! Workflow execution runtime
//!
//! This crate provides the graph builder, the node registry and the engine
//! that runs built workflows, including parallel fan-out and nested
//! sub-workflows.

mod config;
mod executor;
mod graph;
mod input;
pub mod registry;
mod subworkflow;
mod workflow;

pub use config::EngineConfig;
pub use executor::WorkflowEngine;
pub use input::{when, Condition, InputMapping, InputSource};
pub use registry::{register_global, NodeEntry, NodeRegistry};
pub use subworkflow::SubWorkflowNode;
pub use workflow::{Transition, Workflow};
