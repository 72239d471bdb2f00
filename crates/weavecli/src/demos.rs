// crates/weavecli/src/demos.rs

use std::time::Duration;
use weavecore::{node_fn, sync_node_fn, Inputs, NodeError, Value};
use weaveruntime::{when, EngineConfig, InputMapping, NodeRegistry, SubWorkflowNode, Workflow};
use weavenodes::DelayNode;

/// A built-in workflow runnable from the command line
pub struct Demo {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> anyhow::Result<Workflow>,
}

impl Demo {
    pub fn build(&self) -> anyhow::Result<Workflow> {
        (self.build)()
    }
}

pub fn all() -> Vec<Demo> {
    vec![
        Demo {
            name: "linear",
            description: "a -> b -> debug.log, each step reading the previous result",
            build: linear,
        },
        Demo {
            name: "branch",
            description: "grades `score` (pass if >= 50) and reports the grade",
            build: branch,
        },
        Demo {
            name: "parallel",
            description: "fans out to three members and sums their results",
            build: parallel,
        },
        Demo {
            name: "parallel-failure",
            description: "one member fails; the slow sibling is cancelled",
            build: parallel_failure,
        },
        Demo {
            name: "loop",
            description: "increments `count` until it reaches `limit` (default 3)",
            build: counting_loop,
        },
        Demo {
            name: "sub-workflow",
            description: "runs a nested workflow and maps its result",
            build: sub_workflow,
        },
    ]
}

pub fn find(name: &str) -> Option<Demo> {
    all().into_iter().find(|demo| demo.name == name)
}

/// Builder whose registry already holds the standard nodes
fn standard(name: &str) -> Workflow {
    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);
    Workflow::with_registry(name, registry)
}

fn number(inputs: &Inputs, name: &str) -> Result<f64, NodeError> {
    inputs
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}

fn report(template: &'static str, key: &'static str) -> InputMapping {
    InputMapping::new().derive("message", move |ctx| {
        let value = ctx.get(key).map(|v| v.to_json().to_string()).unwrap_or_default();
        Value::from(format!("{} {}", template, value))
    })
}

fn linear() -> anyhow::Result<Workflow> {
    let mut wf = standard("linear");
    wf.register("a", sync_node_fn(|_| Ok(Value::from(1))), &[], Some("x"))
        .register(
            "b",
            sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "x")? + 1.0))),
            &["x"],
            Some("y"),
        );
    wf.node("a").sequence(&["b", "debug.log"]);
    wf.inputs("debug.log", report("y =", "y"));
    Ok(wf)
}

fn branch() -> anyhow::Result<Workflow> {
    let mut wf = standard("branch");
    wf.register(
        "check",
        sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "score").unwrap_or(0.0)))),
        &["score"],
        Some("score"),
    )
    .register("pass", sync_node_fn(|_| Ok(Value::from("pass"))), &[], Some("grade"))
    .register("fail", sync_node_fn(|_| Ok(Value::from("fail"))), &[], Some("grade"));

    wf.node("check").branch(
        vec![("pass", when(|ctx| ctx.get_f64("score").is_some_and(|s| s >= 50.0)))],
        Some("fail"),
        Some("debug.log"),
    );
    wf.inputs("debug.log", report("grade:", "grade"));
    Ok(wf)
}

fn fan_out(name: &str, pause_ms: u64) -> Workflow {
    let mut wf = standard(name);
    wf.register("start", sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "n").unwrap_or(4.0)))), &["n"], Some("n"))
        .register("pause", DelayNode::from_millis(pause_ms), &[], None)
        .register(
            "double",
            node_fn(|inputs: Inputs| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Value::from(number(&inputs, "n")? * 2.0))
            }),
            &["n"],
            Some("doubled"),
        )
        .register(
            "sum",
            sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "doubled")? + number(&inputs, "squared")?))),
            &["doubled", "squared"],
            Some("total"),
        );
    wf
}

fn parallel() -> anyhow::Result<Workflow> {
    let mut wf = fan_out("parallel", 100);
    wf.register(
        "square",
        sync_node_fn(|inputs| {
            let n = number(&inputs, "n")?;
            Ok(Value::from(n * n))
        }),
        &["n"],
        Some("squared"),
    );
    wf.node("start").parallel(&["pause", "double", "square"]).node("sum");
    Ok(wf)
}

fn parallel_failure() -> anyhow::Result<Workflow> {
    let mut wf = fan_out("parallel-failure", 5_000);
    wf.register(
        "square",
        sync_node_fn(|_| Err(NodeError::failed("square is out of order"))),
        &[],
        Some("squared"),
    );
    // "pause" comes after the failing member so the failure cancels it
    wf.node("start").parallel(&["double", "square", "pause"]).node("sum");
    Ok(wf)
}

fn counting_loop() -> anyhow::Result<Workflow> {
    let mut wf = standard("loop");
    wf.register(
        "init",
        sync_node_fn(|inputs| {
            Ok(Value::from(serde_json::json!({
                "count": 0,
                "limit": number(&inputs, "limit").unwrap_or(3.0),
            })))
        }),
        &["limit"],
        None,
    )
    .register(
        "increment",
        sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "count")? + 1.0))),
        &["count"],
        Some("count"),
    );

    let done = when(|ctx| match (ctx.get_f64("count"), ctx.get_f64("limit")) {
        (Some(count), Some(limit)) => count >= limit,
        _ => true,
    });
    wf.node("init")
        .begin_loop(&["increment"])
        .end_loop(done, Some("debug.log"));
    wf.inputs("debug.log", report("count reached", "count"));
    Ok(wf)
}

fn sub_workflow() -> anyhow::Result<Workflow> {
    let mut child = Workflow::new("answer");
    child.register(
        "compute",
        sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "base")? * 2.0))),
        &["base"],
        Some("result"),
    );
    child.node("compute");

    let nested = SubWorkflowNode::new(&child, InputMapping::new().key("base", "seed"), "result")?
        .with_config(EngineConfig::default().with_inherited_observers(true));

    let mut wf = standard("sub-workflow");
    wf.register(
        "seed",
        sync_node_fn(|inputs| Ok(Value::from(number(&inputs, "seed").unwrap_or(21.0)))),
        &["seed"],
        Some("seed"),
    )
    .add_sub_workflow("nested", nested, Some("mapped_output"));
    wf.node("seed").sequence(&["nested", "debug.log"]);
    wf.inputs("debug.log", report("mapped_output =", "mapped_output"));
    Ok(wf)
}
