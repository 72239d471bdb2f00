use async_trait::async_trait;
use weavecore::{Node, NodeContext, NodeError, NodeOutput};

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn kind(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .input("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(node = %ctx.node, "DEBUG: {}", message);

        // Also log all inputs for visibility
        for (key, value) in &ctx.inputs {
            tracing::info!(node = %ctx.node, "  {}: {:?}", key, value);
        }

        Ok(NodeOutput::batch([("message", message)]))
    }
}
