use crate::error::Result;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::GraphProto;

use super::forwarding::forward_nodes;

#[derive(Default)]
pub struct EliminateIdentityPass;

impl EliminateIdentityPass {
    const NAME: &'static str = "eliminate_identity";
}

impl GraphPass for EliminateIdentityPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let removed = forward_nodes(graph, |node| {
            node.op_type == "Identity" && node.is_default_domain()
        });
        Ok(PassResult::rewrites(removed))
    }
}
