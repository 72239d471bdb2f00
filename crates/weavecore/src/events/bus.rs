use super::{Observer, WorkflowEvent};
use crate::BoxError;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Broadcast bus that forwards every observed event to its subscribers
///
/// Register it on an engine with `add_observer` and consume events
/// asynchronously from [`EventBus::subscribe`].
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Observer for EventBus {
    async fn on_event(&self, event: &WorkflowEvent) -> Result<(), BoxError> {
        self.emit(event.clone());
        Ok(())
    }
}
