// crates/weaveruntime/tests/engine_test.rs

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weavecore::{
    node_fn, observer_fn, sync_node_fn, Context, EventKind, FlowError, Inputs, Node, NodeContext,
    NodeError, NodeOutput, Observer, Usage, Value, WorkflowError, WorkflowEvent,
};
use weaveruntime::{when, EngineConfig, InputMapping, SubWorkflowNode, Workflow};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Collects every event it is notified of
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl Recorder {
    fn observer(&self) -> impl Observer + 'static {
        let events = self.events.clone();
        observer_fn(move |event: &WorkflowEvent| events.lock().unwrap().push(event.clone()))
    }

    fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap().clone()
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    /// Node names in the order they started
    fn visited(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.kind == EventKind::NodeStarted)
            .filter_map(|e| e.node.clone())
            .collect()
    }

    fn position(&self, kind: EventKind, node: Option<&str>) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.kind == kind && node.map_or(true, |n| e.node.as_deref() == Some(n)))
    }
}

fn constant(value: impl Into<Value>) -> impl Node {
    let value = value.into();
    sync_node_fn(move |_| Ok(value.clone()))
}

fn noop() -> impl Node {
    sync_node_fn(|_| Ok(Value::Null))
}

fn failing(message: &'static str) -> impl Node {
    sync_node_fn(move |_| Err(NodeError::failed(message)))
}

fn number(inputs: &Inputs, name: &str) -> Result<f64, NodeError> {
    inputs
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}

#[tokio::test]
async fn test_linear_workflow() {
    init_tracing();
    let mut wf = Workflow::new("linear");
    wf.register("a", constant(1), &[], Some("x"))
        .register("b", sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "x")? + 1.0))), &["x"], Some("y"))
        .register("c", sync_node_fn(|inputs| {
            number(&inputs, "y")?;
            Ok(Value::Null)
        }), &["y"], None);
    wf.node("a").sequence(&["b", "c"]);

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    let context = engine.run(Context::new()).await.unwrap();

    assert_eq!(context, Context::new().with("x", 1).with("y", 2));
    assert_eq!(recorder.visited(), vec!["a", "b", "c"]);
    assert_eq!(recorder.kinds().first(), Some(&EventKind::WorkflowStarted));
    assert_eq!(recorder.kinds().last(), Some(&EventKind::WorkflowCompleted));
    assert_eq!(recorder.count(EventKind::TransitionEvaluated), 2);
    assert_eq!(engine.context().await, context);
}

fn branching_workflow() -> Workflow {
    let mut wf = Workflow::new("branch");
    wf.register("a", noop(), &[], None)
        .register("b", constant("pass"), &[], Some("grade"))
        .register("c", constant("fail"), &[], Some("grade"))
        .register("d", noop(), &[], None);
    wf.node("a").branch(
        vec![("b", when(|ctx| ctx.get_f64("score").is_some_and(|s| s >= 50.0)))],
        Some("c"),
        Some("d"),
    );
    wf
}

#[tokio::test]
async fn test_branch_takes_exactly_one_path() {
    init_tracing();
    let wf = branching_workflow();

    for (score, path, grade) in [(70, ["a", "b", "d"], "pass"), (10, ["a", "c", "d"], "fail")] {
        let recorder = Recorder::default();
        let mut engine = wf.build().unwrap();
        engine.add_observer(recorder.observer());

        let context = engine.run(Context::new().with("score", score)).await.unwrap();
        assert_eq!(recorder.visited(), path);
        assert_eq!(context.get_str("grade"), Some(grade));
    }
}

#[tokio::test]
async fn test_branch_first_matching_condition_wins() {
    let mut wf = Workflow::new("first-match");
    wf.register("a", noop(), &[], None)
        .register("b", constant("b"), &[], Some("taken"))
        .register("c", constant("c"), &[], Some("taken"));
    wf.node("a").branch(
        vec![("b", when(|_| true)), ("c", when(|_| true))],
        None,
        None,
    );

    let context = wf.build().unwrap().run(Context::new()).await.unwrap();
    assert_eq!(context.get_str("taken"), Some("b"));
}

fn parallel_workflow(p2: impl Node + 'static) -> Workflow {
    let mut wf = Workflow::new("parallel");
    wf.register("a", noop(), &[], None)
        .register("p1", constant(1), &[], Some("r1"))
        .register("p2", p2, &[], Some("r2"))
        .register("p3", constant(3), &[], Some("r3"))
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2", "p3"]).node("z");
    wf
}

#[tokio::test]
async fn test_parallel_block_completes_before_convergence() {
    init_tracing();
    let recorder = Recorder::default();
    let mut engine = parallel_workflow(constant(2)).build().unwrap();
    engine.add_observer(recorder.observer());

    let context = engine.run(Context::new()).await.unwrap();
    assert_eq!(context.get_f64("r1"), Some(1.0));
    assert_eq!(context.get_f64("r2"), Some(2.0));
    assert_eq!(context.get_f64("r3"), Some(3.0));

    assert_eq!(recorder.count(EventKind::ParallelExecutionStarted), 1);
    assert_eq!(recorder.count(EventKind::ParallelExecutionCompleted), 1);

    let parallel_started = recorder.position(EventKind::ParallelExecutionStarted, None).unwrap();
    let parallel_completed = recorder.position(EventKind::ParallelExecutionCompleted, None).unwrap();
    for member in ["p1", "p2", "p3"] {
        let started = recorder.position(EventKind::NodeStarted, Some(member)).unwrap();
        let completed = recorder.position(EventKind::NodeCompleted, Some(member)).unwrap();
        assert!(parallel_started < started);
        assert!(started < completed);
        assert!(completed < parallel_completed);
    }

    let z_started = recorder.position(EventKind::NodeStarted, Some("z")).unwrap();
    let workflow_completed = recorder.position(EventKind::WorkflowCompleted, None).unwrap();
    assert!(parallel_completed < z_started);
    assert!(z_started < workflow_completed);

    let events = recorder.events();
    let parallel_event = &events[parallel_started];
    assert_eq!(parallel_event.node.as_deref(), Some("a"));
    assert_eq!(
        parallel_event.parallel_nodes.as_deref(),
        Some(&["p1".to_string(), "p2".to_string(), "p3".to_string()][..])
    );
}

#[tokio::test]
async fn test_parallel_failure_halts_run() {
    init_tracing();
    let recorder = Recorder::default();
    let mut engine = parallel_workflow(failing("p2 exploded")).build().unwrap();
    engine.add_observer(recorder.observer());

    let err = engine.run(Context::new()).await.unwrap_err();
    match &err {
        FlowError::ParallelBlock { source_node, member, .. } => {
            assert_eq!(source_node, "a");
            assert_eq!(member, "p2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.failed_node(), Some("p2"));
    assert!(matches!(err.node_error(), Some(NodeError::ExecutionFailed(msg)) if msg == "p2 exploded"));

    assert_eq!(recorder.count(EventKind::ParallelExecutionFailed), 1);
    assert_eq!(recorder.count(EventKind::ParallelExecutionCompleted), 0);
    assert_eq!(recorder.count(EventKind::WorkflowFailed), 1);
    assert!(recorder.position(EventKind::NodeStarted, Some("z")).is_none());

    let failed = recorder
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::ParallelExecutionFailed)
        .unwrap();
    assert!(failed.error.unwrap().contains("p2 exploded"));
}

#[tokio::test]
async fn test_parallel_failure_reports_lowest_index() {
    init_tracing();
    let mut wf = Workflow::new("two-failures");
    wf.register("a", noop(), &[], None)
        .register("p1", failing("first"), &[], None)
        .register("p2", failing("second"), &[], None)
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let err = wf.build().unwrap().run(Context::new()).await.unwrap_err();
    assert_eq!(err.failed_node(), Some("p1"));
}

#[tokio::test]
async fn test_parallel_failure_cancels_slow_sibling() {
    init_tracing();
    let slow = node_fn(|_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, NodeError>(Value::from("late"))
    });

    let mut wf = Workflow::new("slow-sibling");
    wf.register("a", noop(), &[], None)
        .register("p1", failing("boom"), &[], None)
        .register("p2", slow, &[], Some("r2"))
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    // p2 would hang the run if it were not cancelled
    let result = tokio::time::timeout(Duration::from_secs(5), engine.run(Context::new()))
        .await
        .expect("slow sibling was not cancelled");

    let err = result.unwrap_err();
    assert_eq!(err.failed_node(), Some("p1"));
    assert!(recorder.position(EventKind::NodeCompleted, Some("p2")).is_none());
    assert!(recorder.position(EventKind::NodeFailed, Some("p2")).is_none());
    assert_eq!(recorder.count(EventKind::ParallelExecutionFailed), 1);
}

#[tokio::test]
async fn test_parallel_failure_order_ignores_timing() {
    init_tracing();
    let slow_failure = node_fn(|_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<Value, _>(NodeError::failed("p1 slow failure"))
    });

    let mut wf = Workflow::new("slow-first-failure");
    wf.register("a", noop(), &[], None)
        .register("p1", slow_failure, &[], None)
        .register("p2", failing("p2 fast failure"), &[], None)
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    let err = engine.run(Context::new()).await.unwrap_err();
    assert_eq!(err.failed_node(), Some("p1"));
    assert!(matches!(err.node_error(), Some(NodeError::ExecutionFailed(msg)) if msg == "p1 slow failure"));
    assert_eq!(recorder.count(EventKind::ParallelExecutionFailed), 1);
}

#[tokio::test]
async fn test_earlier_members_finish_after_later_failure() {
    init_tracing();
    let finished = Arc::new(Mutex::new(0));
    let counter = finished.clone();
    let slow_success = node_fn(move |_| {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *counter.lock().unwrap() += 1;
            Ok::<_, NodeError>(Value::from("done"))
        }
    });

    let mut wf = Workflow::new("healthy-first");
    wf.register("a", noop(), &[], None)
        .register("p1", slow_success, &[], Some("r1"))
        .register("p2", failing("p2 fast failure"), &[], None)
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let mut engine = wf.build().unwrap();
    let err = engine.run(Context::new()).await.unwrap_err();
    assert_eq!(err.failed_node(), Some("p2"));
    assert_eq!(*finished.lock().unwrap(), 1);
    assert_eq!(engine.context().await.get_str("r1"), Some("done"));
}

// Waits for its token and then reports the cancellation as an error
struct CooperativeNode;

#[async_trait::async_trait]
impl Node for CooperativeNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.cancellation.cancelled().await;
        Err(NodeError::Cancelled)
    }
}

#[tokio::test]
async fn test_cancelled_sibling_is_not_reported() {
    init_tracing();
    let mut wf = Workflow::new("cooperative");
    wf.register("a", noop(), &[], None)
        .register("p1", failing("real cause"), &[], None)
        .register("p2", CooperativeNode, &[], None)
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let err = wf.build().unwrap().run(Context::new()).await.unwrap_err();
    assert_eq!(err.failed_node(), Some("p1"));
    assert!(!err.node_error().unwrap().is_cancelled());
}

#[tokio::test]
async fn test_converge_and_then_close_fan_out() {
    init_tracing();
    type Close = fn(&mut Workflow);
    let closers: [(&str, Close); 2] = [
        ("converge", |wf| {
            wf.converge("z");
        }),
        ("then", |wf| {
            wf.then("z");
        }),
    ];

    for (label, close) in closers {
        let mut wf = Workflow::new(label);
        wf.register("a", noop(), &[], None)
            .register("p1", constant(1), &[], Some("r1"))
            .register("p2", constant(2), &[], Some("r2"))
            .register("z", constant(true), &[], Some("converged"));
        wf.node("a").parallel(&["p1", "p2"]);
        close(&mut wf);
        assert_eq!(wf.convergence_of("a"), Some("z"), "{label}");

        let recorder = Recorder::default();
        let mut engine = wf.build().unwrap();
        engine.add_observer(recorder.observer());

        let context = engine.run(Context::new()).await.unwrap();
        assert_eq!(context.get_f64("r1"), Some(1.0), "{label}");
        assert_eq!(context.get_f64("r2"), Some(2.0), "{label}");
        assert_eq!(context.get_bool("converged"), Some(true), "{label}");
        assert_eq!(recorder.visited().last().map(String::as_str), Some("z"), "{label}");
        assert_eq!(recorder.count(EventKind::NodeStarted), 4, "{label}");
    }
}

#[tokio::test]
async fn test_reentered_parallel_member_skips_to_convergence() {
    init_tracing();
    let visit = sync_node_fn(|inputs| {
        let visits = inputs.get("visits").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(Value::from(visits + 1.0))
    });

    let mut wf = Workflow::new("reentry");
    wf.register("a", noop(), &[], None)
        .register("p1", noop(), &[], None)
        .register("p2", noop(), &[], None)
        .register("z", visit, &["visits"], Some("visits"));
    wf.node("a")
        .parallel(&["p1", "p2"])
        .node("z")
        .then_when("p1", when(|ctx| ctx.get_i64("visits").is_some_and(|v| v < 2)));

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    let context = engine.run(Context::new()).await.unwrap();
    let visited = recorder.visited();
    assert_eq!(visited.iter().filter(|n| *n == "p1").count(), 1);
    assert_eq!(visited.iter().filter(|n| *n == "z").count(), 2);
    assert_eq!(recorder.count(EventKind::ParallelExecutionStarted), 1);
    assert_eq!(context.get_i64("visits"), Some(2));
}

#[tokio::test]
async fn test_parallel_siblings_may_write_same_key() {
    init_tracing();
    let mut wf = Workflow::new("shared-key");
    wf.register("a", noop(), &[], None)
        .register("p1", constant(1), &[], Some("shared"))
        .register("p2", constant(2), &[], Some("shared"))
        .register("z", noop(), &[], None);
    wf.node("a").parallel(&["p1", "p2"]).node("z");

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    let context = engine.run(Context::new()).await.unwrap();
    let shared = context.get_f64("shared").unwrap();
    assert!(shared == 1.0 || shared == 2.0);
    assert_eq!(recorder.count(EventKind::ParallelExecutionCompleted), 1);
    assert_eq!(recorder.count(EventKind::NodeFailed), 0);
}

#[tokio::test]
async fn test_loop_runs_body_until_condition() {
    init_tracing();
    let mut wf = Workflow::new("loop");
    wf.register("l1", sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "count")? + 1.0))), &["count"], Some("count"))
        .register("done", constant(true), &[], Some("finished"));
    wf.begin_loop(&["l1"])
        .end_loop(when(|ctx| ctx.get_i64("count").is_some_and(|c| c >= 3)), Some("done"));

    let recorder = Recorder::default();
    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());

    let context = engine.run(Context::new().with("count", 0)).await.unwrap();
    assert_eq!(recorder.visited(), vec!["l1", "l1", "l1", "done"]);
    assert_eq!(context.get_i64("count"), Some(3));
    assert_eq!(context.get_bool("finished"), Some(true));
}

#[tokio::test]
async fn test_nested_loops() {
    init_tracing();
    let mut wf = Workflow::new("nested");
    wf.register("start", noop(), &[], None)
        .register("outer", sync_node_fn(|inputs| {
            Ok(Value::from(json!({ "outer": number(&inputs, "outer")? + 1.0, "inner": 0 })))
        }), &["outer"], None)
        .register("inner", sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "inner")? + 1.0))), &["inner"], Some("inner"))
        .register("tally", sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "total")? + 1.0))), &["total"], Some("total"))
        .register("done", noop(), &[], None);

    wf.node("start")
        .begin_loop(&["outer"])
        .begin_loop(&["inner", "tally"])
        .end_loop(when(|ctx| ctx.get_i64("inner").is_some_and(|i| i >= 2)), None)
        .end_loop(when(|ctx| ctx.get_i64("outer").is_some_and(|o| o >= 3)), Some("done"));

    let context = wf
        .build()
        .unwrap()
        .run(Context::new().with("outer", 0).with("total", 0))
        .await
        .unwrap();
    assert_eq!(context.get_i64("outer"), Some(3));
    assert_eq!(context.get_i64("total"), Some(6));
}

#[tokio::test]
async fn test_sub_workflow_result_is_mapped() {
    init_tracing();
    let mut child = Workflow::new("child");
    child.register("answer", sync_node_fn(|inputs| {
        Ok(Value::from(number(&inputs, "base")? * 2.0))
    }), &["base"], Some("result"));
    child.node("answer");

    let sub = SubWorkflowNode::new(&child, InputMapping::new().key("base", "seed"), "result").unwrap();

    let mut parent = Workflow::new("parent");
    parent.add_sub_workflow("sub", sub, Some("mapped_output"));
    parent.node("sub");

    let context = parent
        .build()
        .unwrap()
        .run(Context::new().with("seed", 21))
        .await
        .unwrap();
    assert_eq!(context.get_f64("mapped_output"), Some(42.0));
    assert!(!context.contains_key("result"));
}

#[tokio::test]
async fn test_sub_workflow_missing_output_fails() {
    let mut child = Workflow::new("child");
    child.register("x", constant(1), &[], Some("x")).register("y", constant(2), &[], Some("y"));
    child.node("x").then("y");

    let sub = SubWorkflowNode::new(&child, InputMapping::new(), "result").unwrap();
    let mut parent = Workflow::new("parent");
    parent.add_sub_workflow("sub", sub, Some("out"));
    parent.node("sub");

    let err = parent.build().unwrap().run(Context::new()).await.unwrap_err();
    assert_eq!(err.failed_node(), Some("sub"));
    assert!(matches!(err.node_error(), Some(NodeError::MissingOutput(key)) if key == "result"));
}

#[tokio::test]
async fn test_sub_workflow_failure_is_wrapped() {
    let mut child = Workflow::new("child");
    child.register("broken", failing("inner failure"), &[], None);
    child.node("broken");

    let sub = SubWorkflowNode::new(&child, InputMapping::new(), "result").unwrap();
    let mut parent = Workflow::new("parent");
    parent.add_sub_workflow("sub", sub, None);
    parent.node("sub");

    let err = parent.build().unwrap().run(Context::new()).await.unwrap_err();
    match err.node_error() {
        Some(NodeError::SubWorkflow(inner)) => assert_eq!(inner.failed_node(), Some("broken")),
        other => panic!("unexpected error: {other:?}"),
    }
}

fn observed_child(late: Recorder) -> Workflow {
    let mut child = Workflow::new("child");
    child
        .register("inner", constant(5), &[], Some("result"))
        .register(
            "subscribe",
            SubscribingNode { recorder: late },
            &[],
            None,
        );
    child.node("inner").then("subscribe");
    child
}

// Registers an observer on the engine running it while the run is in progress
struct SubscribingNode {
    recorder: Recorder,
}

#[async_trait::async_trait]
impl Node for SubscribingNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.observers.add(Arc::new(self.recorder.observer()));
        Ok(NodeOutput::new())
    }
}

#[tokio::test]
async fn test_observers_propagate_upward_only() {
    init_tracing();
    let parent_recorder = Recorder::default();
    let late_recorder = Recorder::default();

    let sub = SubWorkflowNode::new(&observed_child(late_recorder.clone()), InputMapping::new(), "result").unwrap();
    let mut parent = Workflow::new("parent");
    parent
        .add_sub_workflow("sub", sub, Some("out"))
        .register("after", noop(), &[], None);
    parent.node("sub").then("after");

    let mut engine = parent.build().unwrap();
    engine.add_observer(parent_recorder.observer());
    engine.run(Context::new()).await.unwrap();

    // The parent's observer never sees the nested run
    assert_eq!(parent_recorder.visited(), vec!["sub", "after"]);

    // An observer added inside the nested run is registered on the parent too
    assert_eq!(engine.observers().len(), 2);
    assert!(late_recorder.position(EventKind::NodeStarted, Some("after")).is_some());
    assert!(late_recorder.position(EventKind::NodeStarted, Some("inner")).is_none());
}

#[tokio::test]
async fn test_inherited_observers_see_nested_run() {
    init_tracing();
    let recorder = Recorder::default();

    let mut child = Workflow::new("child");
    child.register("inner", constant(5), &[], Some("result"));
    child.node("inner");
    let sub = SubWorkflowNode::new(&child, InputMapping::new(), "result")
        .unwrap()
        .with_config(EngineConfig::default().with_inherited_observers(true));

    let mut parent = Workflow::new("parent");
    parent.add_sub_workflow("sub", sub, Some("out"));
    parent.node("sub");

    let mut engine = parent.build().unwrap();
    engine.add_observer(recorder.observer());
    engine.run(Context::new()).await.unwrap();

    assert_eq!(recorder.visited(), vec!["sub", "inner"]);
    assert_eq!(recorder.count(EventKind::WorkflowCompleted), 2);
}

#[tokio::test]
async fn test_workflow_level_observer_sees_every_run() {
    let recorder = Recorder::default();
    let mut wf = Workflow::new("observed");
    wf.register("a", noop(), &[], None);
    wf.node("a");
    wf.add_observer(recorder.observer());

    wf.build().unwrap().run(Context::new()).await.unwrap();
    wf.build().unwrap().run(Context::new()).await.unwrap();

    assert_eq!(recorder.count(EventKind::WorkflowStarted), 2);
}

#[tokio::test]
async fn test_failing_observer_does_not_abort_run() {
    init_tracing();
    let mut wf = Workflow::new("noisy");
    wf.register("a", constant(1), &[], Some("x"));
    wf.node("a");
    wf.add_observer(observer_fn(|event: &WorkflowEvent| {
        if event.kind == EventKind::NodeStarted {
            panic!("observer bug");
        }
    }));

    let context = wf.build().unwrap().run(Context::new()).await.unwrap();
    assert_eq!(context.get_f64("x"), Some(1.0));
}

#[tokio::test]
async fn test_node_failure_event_carries_context() {
    let recorder = Recorder::default();
    let mut wf = Workflow::new("failure");
    wf.register("a", constant(1), &[], Some("x"))
        .register("b", failing("bad input"), &[], None)
        .register("c", noop(), &[], None);
    wf.node("a").sequence(&["b", "c"]);

    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());
    let err = engine.run(Context::new()).await.unwrap_err();

    assert!(matches!(err, FlowError::NodeExecution { ref node, .. } if node == "b"));
    let failed = recorder
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::NodeFailed)
        .unwrap();
    assert_eq!(failed.node.as_deref(), Some("b"));
    assert_eq!(failed.context.get_f64("x"), Some(1.0));
    assert!(failed.error.unwrap().contains("bad input"));
    assert!(recorder.position(EventKind::NodeStarted, Some("c")).is_none());
}

#[tokio::test]
async fn test_batch_result_is_merged() {
    let mut wf = Workflow::new("batch");
    wf.register("a", constant(json!({ "left": 1, "right": "two" })), &[], None);
    wf.node("a");

    let context = wf.build().unwrap().run(Context::new()).await.unwrap();
    assert_eq!(context.get_f64("left"), Some(1.0));
    assert_eq!(context.get_str("right"), Some("two"));
}

#[tokio::test]
async fn test_input_mapping_sources() {
    let seen: Arc<Mutex<Option<Inputs>>> = Arc::default();
    let capture = seen.clone();

    let mut wf = Workflow::new("mapping");
    wf.register(
        "a",
        sync_node_fn(move |inputs| {
            *capture.lock().unwrap() = Some(inputs);
            Ok(Value::Null)
        }),
        &["fixed", "renamed", "computed", "plain"],
        None,
    );
    wf.node_with(
        "a",
        InputMapping::new()
            .literal("fixed", "hello")
            .key("renamed", "source")
            .derive("computed", |ctx| Value::from(ctx.get_f64("plain").unwrap_or(0.0) * 10.0)),
    );

    wf.build()
        .unwrap()
        .run(Context::new().with("source", "from context").with("plain", 4))
        .await
        .unwrap();

    let inputs = seen.lock().unwrap().clone().unwrap();
    let expected: HashMap<String, Value> = [
        ("fixed", Value::from("hello")),
        ("renamed", Value::from("from context")),
        ("computed", Value::from(40.0)),
        ("plain", Value::from(4)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(inputs, expected);
}

#[tokio::test]
async fn test_usage_is_reported() {
    struct Metered;

    #[async_trait::async_trait]
    impl Node for Metered {
        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::value("reply").with_usage(Usage::new(10, 5)))
        }
    }

    let recorder = Recorder::default();
    let mut wf = Workflow::new("usage");
    wf.register("llm", Metered, &[], Some("reply"));
    wf.node("llm");

    let mut engine = wf.build().unwrap();
    engine.add_observer(recorder.observer());
    engine.run(Context::new()).await.unwrap();

    let completed = recorder
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::NodeCompleted)
        .unwrap();
    assert_eq!(completed.usage.map(|u| u.total_tokens), Some(15));
    assert_eq!(completed.result, Some(Value::from("reply")));
}

#[tokio::test]
async fn test_step_limit_stops_endless_loop() {
    let mut wf = Workflow::new("endless");
    wf.register("spin", noop(), &[], None);
    wf.begin_loop(&["spin"]).end_loop(when(|_| false), None);

    let mut engine = wf.build_with(EngineConfig::default().with_max_steps(5)).unwrap();
    let err = engine.run(Context::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::StepLimitExceeded(5)));
}

#[tokio::test]
async fn test_transition_events_can_be_disabled() {
    let recorder = Recorder::default();
    let mut wf = branching_workflow();
    wf.add_observer(recorder.observer());

    let mut engine = wf.build_with(EngineConfig::default().with_transition_events(false)).unwrap();
    engine.run(Context::new().with("score", 90)).await.unwrap();
    assert_eq!(recorder.count(EventKind::TransitionEvaluated), 0);
    assert_eq!(recorder.visited(), vec!["a", "b", "d"]);
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    let wf = parallel_workflow(constant(2));
    let first = wf.build().unwrap().run(Context::new().with("seed", 1)).await.unwrap();
    let second = wf.build().unwrap().run(Context::new().with("seed", 1)).await.unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_build_rejects_unregistered_node() {
    let mut wf = Workflow::new("missing");
    wf.register("a", noop(), &[], None);
    wf.node("a").then("ghost");

    match wf.build() {
        Err(FlowError::Workflow(WorkflowError::NodeNotFound(name))) => assert_eq!(name, "ghost"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("build should fail"),
    }
}
