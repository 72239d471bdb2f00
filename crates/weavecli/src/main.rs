// crates/weavecli/src/main.rs

mod demos;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use weavecore::{Context, EventBus, EventKind, Value, WorkflowEvent};
use weaveruntime::{EngineConfig, NodeRegistry};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in demo workflow
    Run {
        /// Demo name (see `weave list`)
        demo: String,

        /// Initial context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Stop after this many node executions
        #[arg(long)]
        max_steps: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a demo workflow as a Graphviz graph
    Dot {
        /// Demo name
        demo: String,
    },

    /// List the built-in demo workflows
    List,

    /// List the standard node library
    Nodes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            demo,
            input,
            max_steps,
            verbose,
        } => {
            init_logging(verbose);
            run_demo(&demo, input, max_steps).await?;
        }

        Commands::Dot { demo } => {
            let workflow = find_demo(&demo)?.build()?;
            println!("{}", workflow.to_dot());
        }

        Commands::List => {
            list_demos();
        }

        Commands::Nodes => {
            list_nodes();
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn find_demo(name: &str) -> Result<demos::Demo> {
    demos::find(name).ok_or_else(|| anyhow::anyhow!("Unknown demo '{}', try `weave list`", name))
}

/// Parse the `--input` JSON object into a seed context
fn parse_input(input: Option<String>) -> Result<Context> {
    let Some(input_str) = input else {
        return Ok(Context::new());
    };

    let json: serde_json::Value = serde_json::from_str(&input_str)?;
    match Value::from_json(json).into_batch() {
        Ok(values) => Ok(values.into()),
        Err(_) => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

async fn run_demo(name: &str, input: Option<String>, max_steps: Option<usize>) -> Result<()> {
    let demo = find_demo(name)?;
    let workflow = demo.build()?;

    println!("🚀 Running demo: {} ({})", demo.name, demo.description);
    println!("📋 Workflow: {}", workflow.name());
    println!("   Nodes: {}", workflow.nodes().len());
    println!("   Transitions: {}", workflow.transitions().len());
    println!();

    let initial = parse_input(input)?;

    let mut config = EngineConfig::default();
    if let Some(max_steps) = max_steps {
        config = config.with_max_steps(max_steps);
    }
    let mut engine = workflow.build_with(config)?;
    tracing::info!(demo = demo.name, max_steps = ?engine.config().max_steps, "Engine ready");

    // Subscribe to events for real-time output
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    engine.add_observer(bus);

    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged behind");
                    println!("     ⚠️  {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = engine.run(initial).await;

    // Dropping the engine closes the bus once every queued event is printed
    drop(engine);
    event_task.await?;

    let context = result?;

    println!();
    println!("📤 Final context:");
    let mut entries: Vec<_> = context.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in entries {
        println!("   {}: {}", key, value.to_json());
    }

    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    let node = event.node.as_deref().unwrap_or("?");
    let error = event.error.as_deref().unwrap_or("unknown error");

    match event.kind {
        EventKind::WorkflowStarted => {
            println!("▶️  Workflow started ({})", event.execution_id);
        }
        EventKind::NodeStarted => {
            println!("  ⚡ Starting node: {}", node);
        }
        EventKind::NodeCompleted => match &event.result {
            Some(result) if !result.is_null() => {
                println!("  ✅ Node {} completed: {}", node, result.to_json());
            }
            _ => println!("  ✅ Node {} completed", node),
        },
        EventKind::NodeFailed => {
            println!("  ❌ Node {} failed: {}", node, error);
        }
        EventKind::TransitionEvaluated => {
            if let Some(transition) = &event.transition {
                println!("     ➡️  {} -> {}", transition.from, transition.to);
            }
        }
        EventKind::ParallelExecutionStarted => {
            let members = event.parallel_nodes.as_deref().unwrap_or_default();
            println!("  🔀 Parallel block after {}: {}", node, members.join(", "));
        }
        EventKind::ParallelExecutionCompleted => {
            println!("  🔁 Parallel block after {} converged", node);
        }
        EventKind::ParallelExecutionFailed => {
            println!("  💥 Parallel block after {} failed: {}", node, error);
        }
        EventKind::WorkflowCompleted => {
            println!("✨ Workflow completed at {}", event.timestamp.format("%H:%M:%S%.3f"));
        }
        EventKind::WorkflowFailed => {
            println!("💥 Workflow failed: {}", error);
        }
    }
}

fn list_demos() {
    println!("📦 Available demos:");
    println!();
    for demo in demos::all() {
        println!("  • {}", demo.name);
        println!("    {}", demo.description);
    }
}

fn list_nodes() {
    println!("📦 Standard nodes:");
    println!();

    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);

    for name in registry.names() {
        if let Ok(entry) = registry.resolve(&name) {
            let output = entry.output.as_deref().unwrap_or("(merged)");
            println!("  • {} (inputs: {}; output: {})", name, entry.inputs.join(", "), output);
        }
    }
}
