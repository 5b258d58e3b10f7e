//! Graph passes and the pipeline that schedules them.
//!
//! Passes share one [`SimplifyContext`] per simplify call, which is how constant folding
//! reaches the injected executor and folding log.

mod context;
pub mod pipeline;

use crate::error::Result;
use crate::proto::GraphProto;

pub use context::SimplifyContext;
pub use pipeline::{Pipeline, PipelineBuilder, Step};

/// Statistics returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of local rewrites applied.
    pub rewrites_applied: usize,
    /// Nodes removed from the graph.
    pub erased_nodes: usize,
    /// Nodes replaced by constants produced through the executor.
    pub folded_nodes: usize,
}

impl PassResult {
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
            folded_nodes: self.folded_nodes + other.folded_nodes,
        }
    }

    pub(crate) fn rewrites(count: usize) -> PassResult {
        PassResult {
            changed: count > 0,
            rewrites_applied: count,
            erased_nodes: count,
            folded_nodes: 0,
        }
    }
}

/// Interface implemented by every simplification pass.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut GraphProto, cx: &mut SimplifyContext<'_>) -> Result<PassResult>;
}
