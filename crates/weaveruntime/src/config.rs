use serde::{Deserialize, Serialize};

/// Configuration for a workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop with `FlowError::StepLimitExceeded` after this many node visits.
    /// `None` runs until the graph ends.
    pub max_steps: Option<usize>,

    /// Emit `TRANSITION_EVALUATED` whenever a sequential transition is taken
    pub emit_transition_events: bool,

    /// Seed a sub-workflow engine with the calling engine's observers.
    /// Only consulted on the config given to a `SubWorkflowNode`.
    pub inherit_observers: bool,
}

impl EngineConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_transition_events(mut self, enabled: bool) -> Self {
        self.emit_transition_events = enabled;
        self
    }

    pub fn with_inherited_observers(mut self, inherit: bool) -> Self {
        self.inherit_observers = inherit;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            emit_transition_events: true,
            inherit_observers: false,
        }
    }
}
