//! Graph view of a workflow for reachability checks and rendering.

use crate::Workflow;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeKind {
    Always,
    Conditional,
    Parallel,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Always => f.write_str(""),
            EdgeKind::Conditional => f.write_str("when"),
            EdgeKind::Parallel => f.write_str("parallel"),
        }
    }
}

pub(crate) fn build_graph(workflow: &Workflow) -> (DiGraph<String, EdgeKind>, HashMap<String, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    let mut add = |graph: &mut DiGraph<String, EdgeKind>, name: &str| -> NodeIndex {
        *index
            .entry(name.to_string())
            .or_insert_with(|| graph.add_node(name.to_string()))
    };

    for name in workflow.nodes() {
        add(&mut graph, name);
    }

    for transition in workflow.transitions() {
        let from = add(&mut graph, &transition.from);
        let to = add(&mut graph, &transition.to);
        let kind = if transition.is_conditional() {
            EdgeKind::Conditional
        } else {
            EdgeKind::Always
        };
        graph.add_edge(from, to, kind);
    }

    for (source, members) in workflow.parallel_blocks() {
        let from = add(&mut graph, source);
        for member in members {
            let to = add(&mut graph, member);
            graph.add_edge(from, to, EdgeKind::Parallel);
        }
    }

    (graph, index)
}

/// Attached nodes that no path from the start node reaches
pub(crate) fn unreachable_nodes(workflow: &Workflow) -> Vec<String> {
    let Some(start) = workflow.start_node() else {
        return workflow.nodes().to_vec();
    };
    let (graph, index) = build_graph(workflow);
    let Some(&start_idx) = index.get(start) else {
        return workflow.nodes().to_vec();
    };

    let mut reached = HashSet::new();
    let mut bfs = Bfs::new(&graph, start_idx);
    while let Some(idx) = bfs.next(&graph) {
        reached.insert(idx);
    }

    workflow
        .nodes()
        .iter()
        .filter(|name| index.get(name.as_str()).map_or(true, |idx| !reached.contains(idx)))
        .cloned()
        .collect()
}

pub(crate) fn to_dot(workflow: &Workflow) -> String {
    let (graph, _) = build_graph(workflow);
    format!("{}", Dot::with_config(&graph, &[]))
}
