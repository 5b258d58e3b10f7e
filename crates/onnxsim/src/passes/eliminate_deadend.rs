use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::graph::{node_uses, prune_value_info};
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::GraphProto;

/// Dead-node elimination: keeps only nodes that graph outputs transitively depend on.
#[derive(Default)]
pub struct EliminateDeadEndPass;

impl EliminateDeadEndPass {
    const NAME: &'static str = "eliminate_deadend";
}

impl GraphPass for EliminateDeadEndPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let mut def_map: HashMap<&str, usize> = HashMap::with_capacity(graph.node.len());
        for (idx, node) in graph.node.iter().enumerate() {
            for output in node.output.iter().filter(|o| !o.is_empty()) {
                def_map.insert(output.as_str(), idx);
            }
        }

        let mut worklist: Vec<String> = graph.output.iter().map(|o| o.name.clone()).collect();
        let mut live_values: HashSet<String> = HashSet::new();
        let mut live_nodes: HashSet<usize> = HashSet::new();
        while let Some(value) = worklist.pop() {
            if !live_values.insert(value.clone()) {
                continue;
            }
            let Some(&idx) = def_map.get(value.as_str()) else {
                continue;
            };
            if live_nodes.insert(idx) {
                worklist.extend(node_uses(&graph.node[idx]));
            }
        }

        let before = graph.node.len();
        let mut idx = 0usize;
        graph.node.retain(|_| {
            let keep = live_nodes.contains(&idx);
            idx += 1;
            keep
        });
        let removed = before - graph.node.len();
        if removed > 0 {
            prune_value_info(graph);
        }
        Ok(PassResult::rewrites(removed))
    }
}
