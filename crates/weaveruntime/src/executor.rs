use crate::input::resolve_inputs;
use crate::registry::NodeEntry;
use crate::{EngineConfig, Workflow};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use weavecore::{
    Context, EventKind, ExecutionId, FlowError, NodeContext, NodeError, Observer, ObserverSet,
    Value, WorkflowEvent,
};

/// Executes a built workflow against a mutable context
///
/// Starting from the workflow's start node, the engine runs one node at a
/// time, takes the first outgoing transition whose condition holds and
/// stops when none does. Parallel fan-outs run their members as concurrent
/// tasks and resume at the block's convergence node.
pub struct WorkflowEngine {
    workflow: Arc<Workflow>,
    config: EngineConfig,
    context: Arc<RwLock<Context>>,
    observers: ObserverSet,
}

impl WorkflowEngine {
    pub(crate) fn new(workflow: Arc<Workflow>, config: EngineConfig) -> Self {
        let observers = ObserverSet::new();
        observers.extend(workflow.observers().iter().cloned());
        Self {
            workflow,
            config,
            context: Arc::default(),
            observers,
        }
    }

    /// Engine running `workflow` on behalf of a node of another engine.
    ///
    /// Observers added to the child are registered on `parent` too. The
    /// parent's observers are copied in only when the config asks for it.
    pub(crate) fn child(workflow: Arc<Workflow>, config: EngineConfig, parent: &ObserverSet) -> Self {
        let observers = ObserverSet::child_of(parent);
        if config.inherit_observers {
            observers.extend(parent.snapshot());
        }
        observers.extend(workflow.observers().iter().cloned());
        Self {
            workflow,
            config,
            context: Arc::default(),
            observers,
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Whether this engine runs as a sub-workflow of another engine
    pub fn has_parent(&self) -> bool {
        self.observers.has_parent()
    }

    /// Register an observer on this engine and, for a sub-workflow engine,
    /// on its parent.
    pub fn add_observer(&self, observer: impl Observer + 'static) {
        self.observers.add(Arc::new(observer));
    }

    pub fn add_observer_arc(&self, observer: Arc<dyn Observer>) {
        self.observers.add(observer);
    }

    /// Snapshot of the context as left by the last run
    pub async fn context(&self) -> Context {
        self.context.read().await.clone()
    }

    /// Run the workflow from its start node, seeding the context with
    /// `initial`, and return the final context.
    ///
    /// Any node failure halts traversal and is returned as is; nothing is
    /// retried.
    pub async fn run(&mut self, initial: Context) -> Result<Context, FlowError> {
        let execution_id = ExecutionId::new_v4();
        *self.context.write().await = initial;

        let scope = RunScope {
            workflow: self.workflow.clone(),
            config: self.config.clone(),
            context: self.context.clone(),
            observers: self.observers.clone(),
            execution_id,
        };

        tracing::info!(
            workflow = %self.workflow.name(),
            execution_id = %execution_id,
            "Starting workflow execution"
        );
        let started = Instant::now();
        scope
            .emit(WorkflowEvent::new(EventKind::WorkflowStarted, execution_id, scope.snapshot().await))
            .await;

        let result = scope.run_loop().await;
        let context = scope.snapshot().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(
                    workflow = %self.workflow.name(),
                    execution_id = %execution_id,
                    duration_ms,
                    "Workflow completed"
                );
                scope
                    .emit(WorkflowEvent::new(EventKind::WorkflowCompleted, execution_id, context.clone()))
                    .await;
                Ok(context)
            }
            Err(e) => {
                tracing::error!(
                    workflow = %self.workflow.name(),
                    execution_id = %execution_id,
                    duration_ms,
                    error = %e,
                    "Workflow failed"
                );
                scope
                    .emit(
                        WorkflowEvent::new(EventKind::WorkflowFailed, execution_id, context)
                            .with_error(&e),
                    )
                    .await;
                Err(e)
            }
        }
    }
}

/// Everything one run shares with the tasks it spawns
#[derive(Clone)]
struct RunScope {
    workflow: Arc<Workflow>,
    config: EngineConfig,
    context: Arc<RwLock<Context>>,
    observers: ObserverSet,
    execution_id: ExecutionId,
}

enum MemberOutcome {
    Succeeded,
    Failed(FlowError),
    Cancelled,
}

impl RunScope {
    async fn snapshot(&self) -> Context {
        self.context.read().await.clone()
    }

    async fn emit(&self, event: WorkflowEvent) {
        self.observers.notify(&event).await;
    }

    fn event(&self, kind: EventKind, context: Context) -> WorkflowEvent {
        WorkflowEvent::new(kind, self.execution_id, context)
    }

    async fn run_loop(&self) -> Result<(), FlowError> {
        let mut current = self.workflow.start_node().map(str::to_string);
        let mut resolved_blocks: HashSet<String> = HashSet::new();
        let mut steps = 0usize;

        while let Some(name) = current.take() {
            let owning_block = resolved_blocks.iter().find(|source| {
                self.workflow
                    .parallel_members(source)
                    .is_some_and(|members| members.contains(&name))
            });
            if let Some(source) = owning_block {
                tracing::warn!(
                    node = %name,
                    source = %source,
                    "Reached a member of a finished parallel block, skipping to its convergence node"
                );
                current = self.workflow.convergence_of(source).map(str::to_string);
                continue;
            }

            steps += 1;
            if let Some(max_steps) = self.config.max_steps {
                if steps > max_steps {
                    return Err(FlowError::StepLimitExceeded(max_steps));
                }
            }

            self.execute_node(&name, CancellationToken::new()).await?;

            if let Some(members) = self.workflow.parallel_members(&name) {
                self.execute_parallel(&name, members).await?;
                resolved_blocks.insert(name.clone());
                current = self.workflow.convergence_of(&name).map(str::to_string);
                if current.is_none() {
                    tracing::debug!(source = %name, "Parallel block has no convergence node, workflow ends");
                }
                continue;
            }

            current = self.next_node(&name).await;
        }

        Ok(())
    }

    /// First outgoing transition of `name` whose condition holds
    async fn next_node(&self, name: &str) -> Option<String> {
        let (next, context) = {
            let context = self.context.read().await;
            let next = self
                .workflow
                .transitions_from(name)
                .find(|transition| transition.matches(&context))
                .map(|transition| transition.to.clone());
            (next, context.clone())
        };

        match &next {
            Some(to) => {
                tracing::debug!(from = name, to = %to, "Taking transition");
                if self.config.emit_transition_events {
                    self.emit(
                        self.event(EventKind::TransitionEvaluated, context)
                            .with_transition(name, to.as_str()),
                    )
                    .await;
                }
            }
            None => tracing::debug!(node = name, "No transition matched, workflow ends"),
        }
        next
    }

    async fn execute_node(&self, name: &str, cancellation: CancellationToken) -> Result<(), FlowError> {
        let entry = self.workflow.registry().resolve(name)?.clone();
        let snapshot = self.snapshot().await;
        let inputs = resolve_inputs(&entry.inputs, self.workflow.input_mapping(name), &snapshot);

        self.emit(self.event(EventKind::NodeStarted, snapshot.clone()).with_node(name))
            .await;

        let ctx = NodeContext {
            node: name.to_string(),
            execution_id: self.execution_id,
            inputs,
            snapshot,
            observers: self.observers.clone(),
            cancellation: cancellation.clone(),
        };

        tracing::debug!(node = name, kind = entry.node.kind(), "Executing node");
        let started = Instant::now();

        match entry.node.execute(ctx).await {
            Ok(mut output) => {
                output.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
                let result = output.value.clone();
                let context = {
                    let mut context = self.context.write().await;
                    bind_output(&mut context, &entry, output.value);
                    context.clone()
                };

                tracing::info!(
                    "Node {} completed in {}ms",
                    name,
                    output.metadata.execution_time_ms
                );
                self.emit(
                    self.event(EventKind::NodeCompleted, context)
                        .with_node(name)
                        .with_result(result)
                        .with_usage(output.metadata.usage),
                )
                .await;
                Ok(())
            }
            Err(e) if e.is_cancelled() && cancellation.is_cancelled() => {
                tracing::debug!(node = name, "Node cancelled");
                Err(FlowError::NodeExecution {
                    node: name.to_string(),
                    source: e,
                })
            }
            Err(e) => {
                tracing::error!("Node {} failed: {}", name, e);
                let context = self.snapshot().await;
                self.emit(
                    self.event(EventKind::NodeFailed, context)
                        .with_node(name)
                        .with_error(&e),
                )
                .await;
                Err(FlowError::NodeExecution {
                    node: name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Run every member of the block after `source` concurrently.
    ///
    /// A failure of member `i` cancels the members declared after it, which
    /// can no longer be the reported cause. Members declared before it keep
    /// running, so once all members have settled the failure of the
    /// lowest-indexed member in declared order is the one reported.
    async fn execute_parallel(&self, source: &str, members: &[String]) -> Result<(), FlowError> {
        tracing::info!(source, members = ?members, "Starting parallel block");
        self.emit(
            self.event(EventKind::ParallelExecutionStarted, self.snapshot().await)
                .with_node(source)
                .with_parallel_nodes(members.to_vec()),
        )
        .await;

        let tokens: Vec<CancellationToken> = members.iter().map(|_| CancellationToken::new()).collect();
        let handles: Vec<JoinHandle<Result<(), FlowError>>> = members
            .iter()
            .zip(&tokens)
            .map(|(member, token)| {
                let scope = self.clone();
                let member = member.clone();
                let token = token.clone();
                tokio::spawn(async move { scope.execute_node(&member, token).await })
            })
            .collect();
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

        let mut running: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| async move { (index, handle.await) })
            .collect();

        // Lowest index that has genuinely failed so far
        let mut cutoff: Option<usize> = None;
        let mut outcomes: Vec<Option<MemberOutcome>> = members.iter().map(|_| None).collect();
        while let Some((index, joined)) = running.next().await {
            let outcome = match joined {
                Ok(Ok(())) => MemberOutcome::Succeeded,
                Ok(Err(e))
                    if tokens[index].is_cancelled()
                        && e.node_error().is_some_and(NodeError::is_cancelled) =>
                {
                    MemberOutcome::Cancelled
                }
                Ok(Err(e)) => MemberOutcome::Failed(e),
                Err(join_error) if join_error.is_cancelled() => MemberOutcome::Cancelled,
                Err(join_error) => MemberOutcome::Failed(FlowError::Execution(format!(
                    "Parallel member '{}' panicked: {}",
                    members[index], join_error
                ))),
            };

            if matches!(outcome, MemberOutcome::Failed(_)) && cutoff.map_or(true, |c| index < c) {
                tracing::warn!(
                    source,
                    member = %members[index],
                    "Parallel member failed, cancelling the members declared after it"
                );
                for later in index + 1..cutoff.unwrap_or(members.len()) {
                    tokens[later].cancel();
                    aborts[later].abort();
                }
                cutoff = Some(index);
            }
            outcomes[index] = Some(outcome);
        }

        let cancelled = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Some(MemberOutcome::Cancelled) | None))
            .count();
        if cancelled > 0 {
            tracing::debug!(source, cancelled, "Suppressed cancelled parallel members");
        }

        let failure = outcomes
            .into_iter()
            .enumerate()
            .find_map(|(index, outcome)| match outcome {
                Some(MemberOutcome::Failed(e)) => Some((index, e)),
                _ => None,
            });

        match failure {
            None => {
                tracing::info!(source, "Parallel block completed");
                self.emit(
                    self.event(EventKind::ParallelExecutionCompleted, self.snapshot().await)
                        .with_node(source)
                        .with_parallel_nodes(members.to_vec()),
                )
                .await;
                Ok(())
            }
            Some((index, error)) => {
                let member = members[index].clone();
                tracing::error!(source, member = %member, error = %error, "Parallel block failed");
                self.emit(
                    self.event(EventKind::ParallelExecutionFailed, self.snapshot().await)
                        .with_node(source)
                        .with_parallel_nodes(members.to_vec())
                        .with_error(&error),
                )
                .await;
                Err(FlowError::ParallelBlock {
                    source_node: source.to_string(),
                    member,
                    source: Box::new(error),
                })
            }
        }
    }
}

/// Bind a node result: to its output key when declared, else merged when
/// it is a batch of pairs, else dropped.
fn bind_output(context: &mut Context, entry: &NodeEntry, value: Value) {
    match &entry.output {
        Some(key) => {
            context.insert(key.clone(), value);
        }
        None => {
            if let Ok(batch) = value.into_batch() {
                context.merge(batch);
            }
        }
    }
}
