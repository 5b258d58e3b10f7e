use crate::error::Result;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::{GraphProto, NodeProto};

use super::forwarding::forward_nodes;

/// Removes `Transpose` nodes whose `perm` is the identity permutation.
#[derive(Default)]
pub struct EliminateNopTransposePass;

impl EliminateNopTransposePass {
    const NAME: &'static str = "eliminate_nop_transpose";
}

fn is_nop_transpose(node: &NodeProto) -> bool {
    if node.op_type != "Transpose" || !node.is_default_domain() {
        return false;
    }
    // Without `perm` the axes are reversed; that is a nop only for rank <= 1, unknown here.
    let Some(perm) = node.attribute("perm") else {
        return false;
    };
    perm.ints
        .iter()
        .enumerate()
        .all(|(axis, p)| i64::try_from(axis).is_ok_and(|axis| axis == *p))
}

impl GraphPass for EliminateNopTransposePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        Ok(PassResult::rewrites(forward_nodes(graph, is_nop_transpose)))
    }
}
