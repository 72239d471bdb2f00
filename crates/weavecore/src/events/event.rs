use crate::{Context, Usage, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle points reported during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    TransitionEvaluated,
    ParallelExecutionStarted,
    ParallelExecutionCompleted,
    ParallelExecutionFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowStarted => "WORKFLOW_STARTED",
            EventKind::WorkflowCompleted => "WORKFLOW_COMPLETED",
            EventKind::WorkflowFailed => "WORKFLOW_FAILED",
            EventKind::NodeStarted => "NODE_STARTED",
            EventKind::NodeCompleted => "NODE_COMPLETED",
            EventKind::NodeFailed => "NODE_FAILED",
            EventKind::TransitionEvaluated => "TRANSITION_EVALUATED",
            EventKind::ParallelExecutionStarted => "PARALLEL_EXECUTION_STARTED",
            EventKind::ParallelExecutionCompleted => "PARALLEL_EXECUTION_COMPLETED",
            EventKind::ParallelExecutionFailed => "PARALLEL_EXECUTION_FAILED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::WorkflowFailed | EventKind::NodeFailed | EventKind::ParallelExecutionFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoints of a transition taken by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub from: String,
    pub to: String,
}

/// Immutable record of a runtime occurrence
///
/// `context` is a snapshot taken when the event was emitted; for failures
/// it is the context at the moment of failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    pub node: Option<String>,
    pub context: Context,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub transition: Option<TransitionInfo>,
    pub parallel_nodes: Option<Vec<String>>,
    pub usage: Option<Usage>,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(kind: EventKind, execution_id: ExecutionId, context: Context) -> Self {
        Self {
            kind,
            execution_id,
            node: None,
            context,
            result: None,
            error: None,
            transition: None,
            parallel_nodes: None,
            usage: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transition = Some(TransitionInfo {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn with_parallel_nodes(mut self, nodes: Vec<String>) -> Self {
        self.parallel_nodes = Some(nodes);
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }
}
