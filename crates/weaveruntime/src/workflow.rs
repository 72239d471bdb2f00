use crate::graph;
use crate::input::{Condition, InputMapping};
use crate::registry::{self, NodeRegistry};
use crate::subworkflow::SubWorkflowNode;
use crate::{EngineConfig, WorkflowEngine};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError};
use weavecore::{Context, FlowError, Node, Observer, WorkflowError};

/// Directed, optionally conditional edge between two nodes
#[derive(Clone)]
pub struct Transition {
    pub from: String,
    pub to: String,
    /// `None` means the transition is always taken
    pub condition: Option<Condition>,
}

impl Transition {
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Whether this transition is taken for `context`
    pub fn matches(&self, context: &Context) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(context))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.is_conditional())
            .finish()
    }
}

#[derive(Clone, Debug)]
struct LoopFrame {
    entry: Option<String>,
    body: Vec<String>,
}

/// Incremental builder of a workflow graph
///
/// The builder keeps a cursor on the "current" node; most operations add
/// transitions leaving it and move it forward. Node references are checked
/// against the registry when the workflow is validated, so nodes may be
/// registered before or after they are wired.
///
/// ```ignore
/// let mut wf = Workflow::new("grading");
/// wf.register("a", node_a, &[], Some("score"))
///     .register("b", node_b, &["score"], None)
///     .register("c", node_c, &["score"], None)
///     .register("d", node_d, &[], None);
/// wf.node("a")
///     .branch(vec![("b", when(|ctx| ctx.get_f64("score") >= Some(50.0)))], Some("c"), Some("d"));
/// let mut engine = wf.build()?;
/// let context = engine.run(Context::new()).await?;
/// ```
#[derive(Clone)]
pub struct Workflow {
    name: String,
    registry: NodeRegistry,
    start: Option<String>,
    current: Option<String>,
    transitions: Vec<Transition>,
    parallel_blocks: HashMap<String, Vec<String>>,
    convergence: HashMap<String, String>,
    input_mappings: HashMap<String, InputMapping>,
    loop_stack: Vec<LoopFrame>,
    open_parallel: Option<String>,
    nodes: Vec<String>,
    observers: Vec<Arc<dyn Observer>>,
    problems: Vec<String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, NodeRegistry::new())
    }

    pub fn with_registry(name: impl Into<String>, registry: NodeRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
            start: None,
            current: None,
            transitions: Vec::new(),
            parallel_blocks: HashMap::new(),
            convergence: HashMap::new(),
            input_mappings: HashMap::new(),
            loop_stack: Vec::new(),
            open_parallel: None,
            nodes: Vec::new(),
            observers: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Builder seeded with a snapshot of the process-wide registry
    pub fn from_global(name: impl Into<String>) -> Self {
        let registry = registry::global()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Self::with_registry(name, registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Register a node on this workflow's registry
    pub fn register(
        &mut self,
        name: impl Into<String>,
        node: impl Node + 'static,
        inputs: &[&str],
        output: Option<&str>,
    ) -> &mut Self {
        self.registry.register(name, node, inputs, output);
        self
    }

    /// Register a nested workflow as an ordinary node whose result is bound
    /// to `output` in this workflow's context.
    pub fn add_sub_workflow(
        &mut self,
        name: impl Into<String>,
        sub_workflow: SubWorkflowNode,
        output: Option<&str>,
    ) -> &mut Self {
        self.registry.register(name, sub_workflow, &[], output);
        self
    }

    /// Observe every engine built from this workflow, including engines
    /// that run it as a sub-workflow.
    pub fn add_observer(&mut self, observer: impl Observer + 'static) -> &mut Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn add_observer_arc(&mut self, observer: Arc<dyn Observer>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    /// Explicit input mapping for `name`
    pub fn inputs(&mut self, name: impl Into<String>, mapping: InputMapping) -> &mut Self {
        self.input_mappings.insert(name.into(), mapping);
        self
    }

    /// Attach `name` as a plain step and move the cursor to it.
    ///
    /// While a parallel fan-out is open this instead closes it, making
    /// `name` the convergence node of the block.
    pub fn node(&mut self, name: &str) -> &mut Self {
        if self.close_parallel(name) {
            return self;
        }
        self.position(name);
        self
    }

    /// [`node`](Workflow::node) with an explicit input mapping
    pub fn node_with(&mut self, name: &str, mapping: InputMapping) -> &mut Self {
        self.input_mappings.insert(name.to_string(), mapping);
        self.node(name)
    }

    /// Chain nodes in strict order starting from the current node.
    ///
    /// Equivalent to calling [`then`](Workflow::then) for each name, so an
    /// open parallel fan-out converges on the first one.
    pub fn sequence(&mut self, names: &[&str]) -> &mut Self {
        for name in names {
            self.link(name, None);
        }
        self
    }

    /// Unconditional edge from the current node to `next`.
    pub fn then(&mut self, next: &str) -> &mut Self {
        self.link(next, None);
        self
    }

    /// Conditional edge from the current node to `next`.
    pub fn then_when(&mut self, next: &str, condition: Condition) -> &mut Self {
        self.link(next, Some(condition));
        self
    }

    /// One conditional transition per `(target, condition)` in order, then an
    /// unconditional one to `default`. The first matching transition wins,
    /// so `default` acts as the fallback.
    ///
    /// With `next`, every branch target (and `default`) is wired to `next`
    /// and the cursor moves there; otherwise it stays on the branching node.
    pub fn branch(
        &mut self,
        branches: Vec<(&str, Condition)>,
        default: Option<&str>,
        next: Option<&str>,
    ) -> &mut Self {
        let Some(source) = self.current.clone() else {
            self.problems.push("branch() called before any node".to_string());
            return self;
        };

        let mut targets = Vec::with_capacity(branches.len() + 1);
        for (target, condition) in branches {
            self.add_transition(&source, target, Some(condition));
            self.attach(target);
            targets.push(target);
        }
        if let Some(default) = default {
            self.add_transition(&source, default, None);
            self.attach(default);
            targets.push(default);
        }

        if let Some(next) = next {
            for target in targets {
                if target != next && !self.has_transition(target, next) {
                    self.add_transition(target, next, None);
                }
            }
            self.convergence.insert(source, next.to_string());
            self.position(next);
        }
        self
    }

    /// Explicit convergence target.
    ///
    /// Closes an open parallel fan-out on `name`; otherwise wires every node
    /// of this graph that has no outgoing transition to `name`.
    pub fn converge(&mut self, name: &str) -> &mut Self {
        if self.close_parallel(name) {
            return self;
        }

        let dangling: Vec<String> = self
            .nodes
            .iter()
            .filter(|node| node.as_str() != name)
            .filter(|node| !self.parallel_blocks.contains_key(node.as_str()))
            .filter(|node| !self.transitions.iter().any(|t| &t.from == *node))
            .cloned()
            .collect();

        for node in &dangling {
            self.add_transition(node, name, None);
        }
        tracing::debug!(workflow = %self.name, target = name, sources = ?dangling, "Converging");
        self.position(name);
        self
    }

    /// Fan out from the current node. The next call that picks a single
    /// successor (`node`, `then`, `converge`) becomes the convergence node.
    pub fn parallel(&mut self, members: &[&str]) -> &mut Self {
        let Some(source) = self.current.clone() else {
            self.problems.push("parallel() called before any node".to_string());
            return self;
        };
        if members.is_empty() {
            self.problems.push(format!("parallel() after '{}' has no members", source));
            return self;
        }
        if let Some(open) = &self.open_parallel {
            self.problems.push(format!(
                "parallel() after '{}' while the fan-out from '{}' is still open",
                source, open
            ));
            return self;
        }

        for member in members {
            self.attach(member);
        }
        self.parallel_blocks
            .insert(source.clone(), members.iter().map(|m| m.to_string()).collect());
        self.open_parallel = Some(source);
        self
    }

    /// Open a loop whose body runs `body` in order, entered from the
    /// current node. Closed by [`end_loop`](Workflow::end_loop).
    pub fn begin_loop(&mut self, body: &[&str]) -> &mut Self {
        let Some(last) = body.last() else {
            self.problems.push("begin_loop() with an empty body".to_string());
            return self;
        };

        for node in body {
            self.attach(node);
        }
        if self.start.is_none() {
            self.start = Some(body[0].to_string());
        }
        self.loop_stack.push(LoopFrame {
            entry: self.current.clone(),
            body: body.iter().map(|b| b.to_string()).collect(),
        });
        self.current = Some(last.to_string());
        self
    }

    /// Close the innermost open loop.
    ///
    /// The body is chained after its entry node; the node the cursor is on
    /// (the last body node unless an inner loop moved it) loops back to the
    /// first body node while `until` is false and moves to `next` once it
    /// is true. Without `next` the cursor stays on that node, so a
    /// following `then` adds the exit.
    pub fn end_loop(&mut self, until: Condition, next: Option<&str>) -> &mut Self {
        let Some(frame) = self.loop_stack.pop() else {
            self.problems.push("end_loop() without a matching begin_loop()".to_string());
            return self;
        };

        let first = frame.body[0].clone();
        if let Some(entry) = &frame.entry {
            if entry != &first && !self.has_transition(entry, &first) {
                self.add_transition(entry, &first, None);
            }
        }
        for pair in frame.body.windows(2) {
            if !self.has_transition(&pair[0], &pair[1]) {
                self.add_transition(&pair[0], &pair[1], None);
            }
        }

        let tail = self
            .current
            .clone()
            .unwrap_or_else(|| frame.body[frame.body.len() - 1].clone());
        let exit = until.clone();
        let again: Condition = Arc::new(move |ctx: &Context| !until(ctx));
        self.add_transition(&tail, &first, Some(again));

        match next {
            Some(next) => {
                self.add_transition(&tail, next, Some(exit));
                self.position(next);
            }
            None => self.current = Some(tail),
        }
        self
    }

    /// Check the graph and bind it to an engine with default configuration.
    pub fn build(&self) -> Result<WorkflowEngine, FlowError> {
        self.build_with(EngineConfig::default())
    }

    pub fn build_with(&self, config: EngineConfig) -> Result<WorkflowEngine, FlowError> {
        Ok(WorkflowEngine::new(Arc::new(self.frozen()?), config))
    }

    /// Validated copy with transient builder state cleared
    pub(crate) fn frozen(&self) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.clone();
        workflow.open_parallel = None;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Check that the graph only references registered nodes and that
    /// builder calls were well-formed.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if !self.problems.is_empty() {
            return Err(WorkflowError::Invalid(self.problems.join("; ")));
        }
        if let Some(frame) = self.loop_stack.last() {
            return Err(WorkflowError::UnclosedLoop(frame.body[0].clone()));
        }
        let start = self
            .start
            .as_deref()
            .ok_or_else(|| WorkflowError::NoStartNode(self.name.clone()))?;

        let referenced = std::iter::once(start)
            .chain(self.nodes.iter().map(String::as_str))
            .chain(self.transitions.iter().flat_map(|t| [t.from.as_str(), t.to.as_str()]))
            .chain(self.parallel_blocks.iter().flat_map(|(source, members)| {
                std::iter::once(source.as_str()).chain(members.iter().map(String::as_str))
            }))
            .chain(self.convergence.iter().flat_map(|(k, v)| [k.as_str(), v.as_str()]));

        let mut seen = HashSet::new();
        for name in referenced {
            if seen.insert(name) && !self.registry.contains(name) {
                return Err(WorkflowError::NodeNotFound(name.to_string()));
            }
        }

        let unreachable = graph::unreachable_nodes(self);
        if !unreachable.is_empty() {
            tracing::warn!(workflow = %self.name, nodes = ?unreachable, "Nodes unreachable from start");
        }
        Ok(())
    }

    /// Graphviz rendering of the graph
    pub fn to_dot(&self) -> String {
        graph::to_dot(self)
    }

    pub fn start_node(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Nodes attached to the graph, in the order they were first wired
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Outgoing transitions of `name` in evaluation order
    pub fn transitions_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.from == name)
    }

    pub fn parallel_members(&self, source: &str) -> Option<&[String]> {
        self.parallel_blocks.get(source).map(Vec::as_slice)
    }

    pub fn parallel_blocks(&self) -> &HashMap<String, Vec<String>> {
        &self.parallel_blocks
    }

    pub fn convergence_of(&self, source: &str) -> Option<&str> {
        self.convergence.get(source).map(String::as_str)
    }

    pub fn input_mapping(&self, name: &str) -> Option<&InputMapping> {
        self.input_mappings.get(name)
    }

    pub fn observers(&self) -> &[Arc<dyn Observer>] {
        &self.observers
    }

    fn attach(&mut self, name: &str) {
        if !self.nodes.iter().any(|n| n == name) {
            self.nodes.push(name.to_string());
        }
    }

    fn position(&mut self, name: &str) {
        if self.start.is_none() {
            self.start = Some(name.to_string());
        }
        self.attach(name);
        self.current = Some(name.to_string());
    }

    fn add_transition(&mut self, from: &str, to: &str, condition: Option<Condition>) {
        self.attach(from);
        self.attach(to);
        self.transitions.push(Transition {
            from: from.to_string(),
            to: to.to_string(),
            condition,
        });
    }

    fn has_transition(&self, from: &str, to: &str) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to && !t.is_conditional())
    }

    /// Edge from the cursor to `next`, skipping self-loops.
    fn link(&mut self, next: &str, condition: Option<Condition>) {
        if self.close_parallel(next) {
            return;
        }
        if let Some(current) = self.current.clone() {
            if current == next {
                tracing::debug!(node = next, "Skipping self-transition");
            } else {
                self.add_transition(&current, next, condition);
            }
        }
        self.position(next);
    }

    fn close_parallel(&mut self, target: &str) -> bool {
        let Some(source) = self.open_parallel.take() else {
            return false;
        };

        let members = self.parallel_blocks.get(&source).cloned().unwrap_or_default();
        for member in &members {
            if member != target {
                self.add_transition(member, target, None);
            }
        }
        self.convergence.insert(source, target.to_string());
        self.position(target);
        true
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &self.nodes)
            .field("transitions", &self.transitions)
            .field("parallel_blocks", &self.parallel_blocks)
            .field("convergence", &self.convergence)
            .field("observers", &self.observers.len())
            .finish()
    }
}
