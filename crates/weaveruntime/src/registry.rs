use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use weavecore::{Node, WorkflowError};

/// A registered node: the callable plus its declared signature
#[derive(Clone)]
pub struct NodeEntry {
    pub name: String,
    pub node: Arc<dyn Node>,
    /// Declared input parameter names
    pub inputs: Vec<String>,
    /// Context key the result is bound to
    pub output: Option<String>,
}

impl fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEntry")
            .field("name", &self.name)
            .field("kind", &self.node.kind())
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

/// Lookup table from node name to [`NodeEntry`]
///
/// Owned by a workflow builder. Registering an existing name replaces the
/// previous entry.
#[derive(Clone, Default, Debug)]
pub struct NodeRegistry {
    entries: HashMap<String, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node under `name`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        node: impl Node + 'static,
        inputs: &[&str],
        output: Option<&str>,
    ) {
        self.register_arc(name, Arc::new(node), inputs, output);
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        node: Arc<dyn Node>,
        inputs: &[&str],
        output: Option<&str>,
    ) {
        let name = name.into();
        self.insert(NodeEntry {
            name: name.clone(),
            node,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.map(str::to_string),
        });
    }

    pub fn insert(&mut self, entry: NodeEntry) {
        tracing::debug!(node = %entry.name, kind = entry.node.kind(), "Registering node");
        if let Some(previous) = self.entries.insert(entry.name.clone(), entry) {
            tracing::warn!(node = %previous.name, "Node re-registered, previous entry replaced");
        }
    }

    /// Look up a node by name
    pub fn resolve(&self, name: &str) -> Result<&NodeEntry, WorkflowError> {
        self.entries
            .get(name)
            .ok_or_else(|| WorkflowError::NodeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered node names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this registry.
    pub fn extend_from(&mut self, other: &NodeRegistry) {
        for entry in other.entries.values() {
            self.insert(entry.clone());
        }
    }
}

/// Process-wide registry for callers that prefer ambient registration.
///
/// Workflows never read it implicitly; use `Workflow::from_global` to seed
/// a builder with a snapshot.
pub fn global() -> &'static RwLock<NodeRegistry> {
    static GLOBAL: OnceLock<RwLock<NodeRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(NodeRegistry::new()))
}

/// Register a node on the [`global`] registry.
pub fn register_global(
    name: impl Into<String>,
    node: impl Node + 'static,
    inputs: &[&str],
    output: Option<&str>,
) {
    global()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .register(name, node, inputs, output);
}
