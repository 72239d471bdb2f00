use async_trait::async_trait;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value};

/// Parse a JSON string into a native [`Value`]
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn kind(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input("json")?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: format!("{:?}", input),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::value(Value::from_json(parsed)))
    }
}

/// Stringify a value to pretty-printed JSON
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn kind(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?;

        let json_str = serde_json::to_string_pretty(&value.to_json())
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::value(json_str))
    }
}
