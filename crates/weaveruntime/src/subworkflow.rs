use crate::input::InputMapping;
use crate::{EngineConfig, Workflow, WorkflowEngine};
use async_trait::async_trait;
use std::sync::Arc;
use weavecore::{Context, Node, NodeContext, NodeError, NodeOutput, WorkflowError};

/// A workflow embedded as a single node of another workflow
///
/// Each invocation runs the nested workflow on a fresh context built from
/// `inputs` (resolved against the calling workflow's context) and returns
/// the value the nested run left under `output`. Observers registered on
/// the nested engine also see the calling workflow's events; the reverse
/// only holds when [`EngineConfig::inherit_observers`] is set.
pub struct SubWorkflowNode {
    workflow: Arc<Workflow>,
    inputs: InputMapping,
    output: String,
    config: EngineConfig,
    unwrap_single_entry: bool,
}

impl SubWorkflowNode {
    /// Validates `workflow` up front so a broken nested graph is reported
    /// when the outer workflow is assembled.
    pub fn new(
        workflow: &Workflow,
        inputs: InputMapping,
        output: impl Into<String>,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            workflow: Arc::new(workflow.frozen()?),
            inputs,
            output: output.into(),
            config: EngineConfig::default(),
            unwrap_single_entry: false,
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// When the nested run ends with exactly one context entry, return that
    /// entry's value whatever its key.
    pub fn unwrap_single_entry(mut self, enabled: bool) -> Self {
        self.unwrap_single_entry = enabled;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn output_key(&self) -> &str {
        &self.output
    }

    fn extract(&self, context: Context) -> Result<NodeOutput, NodeError> {
        if self.unwrap_single_entry && context.len() == 1 {
            if let Some((_, value)) = context.into_iter().next() {
                return Ok(NodeOutput::value(value));
            }
            return Err(NodeError::MissingOutput(self.output.clone()));
        }
        context
            .get(&self.output)
            .cloned()
            .map(NodeOutput::value)
            .ok_or_else(|| NodeError::MissingOutput(self.output.clone()))
    }
}

#[async_trait]
impl Node for SubWorkflowNode {
    fn kind(&self) -> &str {
        "sub_workflow"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let initial: Context = self.inputs.resolve_all(&ctx.snapshot).into();
        tracing::debug!(
            node = %ctx.node,
            workflow = %self.workflow.name(),
            inputs = ?initial.keys().collect::<Vec<_>>(),
            "Starting sub-workflow"
        );

        let mut engine = WorkflowEngine::child(self.workflow.clone(), self.config.clone(), &ctx.observers);
        let result = tokio::select! {
            result = engine.run(initial) => result,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let context = result.map_err(|e| NodeError::SubWorkflow(Box::new(e)))?;
        self.extract(context)
    }
}
