use crate::events::{ExecutionId, ObserverSet};
use crate::{Context, NodeError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// Inputs resolved for one node invocation, keyed by parameter name
pub type Inputs = HashMap<String, Value>;

/// Core trait that all executable nodes implement
///
/// Plain callables and nested workflows both run through this one
/// capability, so the engine never inspects what kind of node it holds.
#[async_trait]
pub trait Node: Send + Sync {
    /// Short label used in diagnostics (e.g. "function", "sub_workflow")
    fn kind(&self) -> &str {
        "function"
    }

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Registered node name
    pub node: String,

    /// Run this invocation belongs to
    pub execution_id: ExecutionId,

    /// Declared inputs resolved from mappings and the context
    pub inputs: Inputs,

    /// Read-only view of the workflow context at invocation time
    pub snapshot: Context,

    /// Observers of the engine running this node
    pub observers: ObserverSet,

    /// Cancelled when a sibling in the same parallel block fails
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node: impl Into<String>, execution_id: ExecutionId) -> Self {
        Self {
            node: node.into(),
            execution_id,
            inputs: HashMap::new(),
            snapshot: Context::new(),
            observers: ObserverSet::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: Context) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Get input with default
    pub fn input_or(&self, name: &str, default: Value) -> Value {
        self.inputs.get(name).cloned().unwrap_or(default)
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Result value; bound to the output key or merged when it is a batch
    pub value: Value,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    /// An output carrying no result.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            metadata: NodeMetadata::default(),
        }
    }

    /// A batch of pairs merged into the context when the node declares no
    /// output key.
    pub fn batch<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::value(Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.metadata.usage = Some(usage);
        self
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::value(value)
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub usage: Option<Usage>,
    pub custom: HashMap<String, Value>,
}

/// Resource usage reported by a node, e.g. token counts of a model call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Node backed by an async closure over its inputs
pub struct FnNode<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`Node`].
pub fn node_fn<F, Fut>(f: F) -> FnNode<F, Fut>
where
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    FnNode {
        f,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Node for FnNode<F, Fut>
where
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.f)(ctx.inputs).await.map(NodeOutput::value)
    }
}

/// Node backed by a synchronous closure over its inputs
pub struct SyncFnNode<F> {
    f: F,
}

/// Wrap a plain closure as a [`Node`].
pub fn sync_node_fn<F>(f: F) -> SyncFnNode<F>
where
    F: Fn(Inputs) -> Result<Value, NodeError> + Send + Sync + 'static,
{
    SyncFnNode { f }
}

#[async_trait]
impl<F> Node for SyncFnNode<F>
where
    F: Fn(Inputs) -> Result<Value, NodeError> + Send + Sync + 'static,
{
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.f)(ctx.inputs).map(NodeOutput::value)
    }
}
