use thiserror::Error;

/// Boxed error accepted from node and observer code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Node '{node}' failed: {source}")]
    NodeExecution {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Parallel block after '{source_node}' failed in member '{member}': {source}")]
    ParallelBlock {
        source_node: String,
        member: String,
        #[source]
        source: Box<FlowError>,
    },

    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Name of the node whose failure ended the run, looking through
    /// parallel block wrappers.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            FlowError::NodeExecution { node, .. } => Some(node),
            FlowError::ParallelBlock { source, .. } => source.failed_node(),
            _ => None,
        }
    }

    /// The error raised by the node callable itself, if any.
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            FlowError::NodeExecution { source, .. } => Some(source),
            FlowError::ParallelBlock { source, .. } => source.node_error(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Sub-workflow did not produce output '{0}'")]
    MissingOutput(String),

    #[error("Sub-workflow failed: {0}")]
    SubWorkflow(#[source] Box<FlowError>),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] BoxError),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Workflow '{0}' has no start node")]
    NoStartNode(String),

    #[error("Loop starting at '{0}' was never closed with end_loop")]
    UnclosedLoop(String),
}
