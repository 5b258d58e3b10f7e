//! Def-use helpers over `GraphProto`.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SimplifyError};
use crate::proto::{GraphProto, NodeProto};

/// Rejects graphs that consume a name before anything defines it.
pub(crate) fn validate(graph: &GraphProto) -> Result<()> {
    let mut defined: HashSet<&str> = graph
        .input
        .iter()
        .map(|info| info.name.as_str())
        .chain(graph.initializer.iter().map(|t| t.name.as_str()))
        .collect();

    for (idx, node) in graph.node.iter().enumerate() {
        for input in node.input.iter().filter(|name| !name.is_empty()) {
            if !defined.contains(input.as_str()) {
                return Err(SimplifyError::rejected(format!(
                    "node {} ({} '{}') consumes '{}' before it is defined; \
                     graph is not topologically sorted",
                    idx, node.op_type, node.name, input
                )));
            }
        }
        defined.extend(node.output.iter().map(String::as_str));
    }

    for output in &graph.output {
        if !defined.contains(output.name.as_str()) {
            return Err(SimplifyError::rejected(format!(
                "graph output '{}' is never produced",
                output.name
            )));
        }
    }
    Ok(())
}

pub(crate) fn graph_output_names(graph: &GraphProto) -> HashSet<String> {
    graph.output.iter().map(|info| info.name.clone()).collect()
}

/// Names referenced by nested graphs of `node`, including names they define themselves.
fn subgraph_references(node: &NodeProto, out: &mut Vec<String>) {
    for attr in &node.attribute {
        for graph in attr.g.iter().chain(attr.graphs.iter()) {
            for inner in &graph.node {
                out.extend(inner.input.iter().filter(|n| !n.is_empty()).cloned());
                subgraph_references(inner, out);
            }
            out.extend(graph.output.iter().map(|info| info.name.clone()));
        }
    }
}

/// Every name `node` reads, directly or from a nested graph.
pub(crate) fn node_uses(node: &NodeProto) -> Vec<String> {
    let mut uses: Vec<String> = node
        .input
        .iter()
        .filter(|name| !name.is_empty())
        .cloned()
        .collect();
    subgraph_references(node, &mut uses);
    uses
}

/// Number of readers per name, counting graph outputs as readers.
pub(crate) fn use_counts(graph: &GraphProto) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for node in &graph.node {
        for name in node_uses(node) {
            *counts.entry(name).or_default() += 1;
        }
    }
    for output in &graph.output {
        *counts.entry(output.name.clone()).or_default() += 1;
    }
    counts
}

/// Rewrites every read of `from` to read `to`, including reads inside nested graphs.
pub(crate) fn replace_uses(graph: &mut GraphProto, from: &str, to: &str) {
    for node in &mut graph.node {
        replace_in_node(node, from, to);
    }
}

fn replace_in_node(node: &mut NodeProto, from: &str, to: &str) {
    for input in &mut node.input {
        if *input == from {
            *input = to.to_string();
        }
    }
    for attr in &mut node.attribute {
        for graph in attr.g.iter_mut().chain(attr.graphs.iter_mut()) {
            let shadowed = graph.input.iter().any(|info| info.name == from)
                || graph.node.iter().any(|n| n.output.iter().any(|o| o == from));
            if shadowed {
                continue;
            }
            for inner in &mut graph.node {
                replace_in_node(inner, from, to);
            }
            for output in &mut graph.output {
                if output.name == from {
                    output.name = to.to_string();
                }
            }
        }
    }
}

/// Drops `value_info` entries for names nothing defines any more.
pub(crate) fn prune_value_info(graph: &mut GraphProto) {
    let defined: HashSet<String> = graph
        .node
        .iter()
        .flat_map(|node| node.output.iter().cloned())
        .collect();
    graph.value_info.retain(|info| defined.contains(&info.name));
}
