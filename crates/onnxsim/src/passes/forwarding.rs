use crate::graph::{graph_output_names, replace_uses, use_counts};
use crate::proto::{GraphProto, NodeProto};

/// Removes nodes that pass their first input through unchanged, rewiring readers of the
/// first output to read the input instead.
///
/// A node is kept when its forwarded output is a graph output or when any further output
/// is still read.
pub(crate) fn forward_nodes<P>(graph: &mut GraphProto, is_forwarding: P) -> usize
where
    P: Fn(&NodeProto) -> bool,
{
    let outputs = graph_output_names(graph);
    let uses = use_counts(graph);
    let mut removed = 0usize;
    let mut idx = 0usize;
    while idx < graph.node.len() {
        let node = &graph.node[idx];
        let forwardable = is_forwarding(node)
            && node.input.first().is_some_and(|input| !input.is_empty())
            && node.output.first().is_some_and(|out| !outputs.contains(out))
            && node
                .output
                .iter()
                .skip(1)
                .all(|extra| extra.is_empty() || !uses.contains_key(extra));
        if !forwardable {
            idx += 1;
            continue;
        }
        let from = node.output[0].clone();
        let to = node.input[0].clone();
        graph.node.remove(idx);
        replace_uses(graph, &from, &to);
        removed += 1;
    }
    removed
}
