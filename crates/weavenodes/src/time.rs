use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use weavecore::{Node, NodeContext, NodeError, NodeOutput};

/// Delay execution, then pass every input through as a batch
///
/// The `delay_ms` input overrides the configured delay. A sibling failure
/// in a parallel block interrupts the wait.
pub struct DelayNode {
    delay: Duration,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl Default for DelayNode {
    fn default() -> Self {
        // Default to 1 second if not specified
        Self::from_millis(1000)
    }
}

#[async_trait]
impl Node for DelayNode {
    fn kind(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay = match ctx.input("delay_ms") {
            Some(value) => {
                let millis = value.as_f64().filter(|ms| *ms >= 0.0).ok_or_else(|| {
                    NodeError::InvalidInputType {
                        field: "delay_ms".to_string(),
                        expected: "non-negative number".to_string(),
                        actual: format!("{:?}", value),
                    }
                })?;
                Duration::from_millis(millis as u64)
            }
            None => self.delay,
        };

        tracing::debug!(node = %ctx.node, "Delaying for {}ms", delay.as_millis());

        tokio::select! {
            _ = sleep(delay) => {}
            _ = ctx.cancellation.cancelled() => {
                tracing::debug!(node = %ctx.node, "Delay cancelled");
                return Err(NodeError::Cancelled);
            }
        }

        // Pass through any inputs
        Ok(NodeOutput::batch(ctx.inputs))
    }
}
