use crate::error::Result;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::{GraphProto, NodeProto};

use super::forwarding::forward_nodes;

/// Removes inference-mode `Dropout` nodes whose mask output is unused.
#[derive(Default)]
pub struct EliminateNopDropoutPass;

impl EliminateNopDropoutPass {
    const NAME: &'static str = "eliminate_nop_dropout";
}

fn is_inference_dropout(node: &NodeProto) -> bool {
    if node.op_type != "Dropout" || !node.is_default_domain() {
        return false;
    }
    // opset 12+ takes `training_mode` as the third input; any value there may enable dropout.
    node.input.get(2).map_or(true, |mode| mode.is_empty())
}

impl GraphPass for EliminateNopDropoutPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        Ok(PassResult::rewrites(forward_nodes(graph, is_inference_dropout)))
    }
}
