use std::collections::HashSet;

use crate::error::Result;
use crate::graph::node_uses;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::GraphProto;

/// Drops initializers no node or graph output reads, along with their legacy graph-input
/// declarations.
#[derive(Default)]
pub struct EliminateUnusedInitializerPass;

impl EliminateUnusedInitializerPass {
    const NAME: &'static str = "eliminate_unused_initializer";
}

impl GraphPass for EliminateUnusedInitializerPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let used: HashSet<String> = graph
            .node
            .iter()
            .flat_map(node_uses)
            .chain(graph.output.iter().map(|o| o.name.clone()))
            .collect();

        let removed: HashSet<String> = graph
            .initializer
            .iter()
            .filter(|t| !used.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        if removed.is_empty() {
            return Ok(PassResult::default());
        }

        graph.initializer.retain(|t| !removed.contains(&t.name));
        graph.input.retain(|info| !removed.contains(&info.name));
        Ok(PassResult {
            changed: true,
            rewrites_applied: removed.len(),
            erased_nodes: 0,
            folded_nodes: 0,
        })
    }
}
