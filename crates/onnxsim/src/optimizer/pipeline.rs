use std::sync::Arc;

use crate::error::Result;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::options::SimplifyOptions;
use crate::passes::{
    ConstantFoldingPass, EliminateDeadEndPass, EliminateIdentityPass, EliminateNopDropoutPass,
    EliminateNopTransposePass, EliminateUnusedInitializerPass, ShapeInferencePass,
};
use crate::proto::GraphProto;

pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

/// Optimizer passes selectable through `skip_optimizers`, in pipeline order.
fn optimizer_passes() -> Vec<Arc<dyn GraphPass>> {
    vec![
        Arc::new(EliminateIdentityPass),
        Arc::new(EliminateNopTransposePass),
        Arc::new(EliminateNopDropoutPass),
        Arc::new(EliminateDeadEndPass),
        Arc::new(EliminateUnusedInitializerPass),
    ]
}

/// Names accepted in `skip_optimizers`.
pub fn known_pass_names() -> Vec<&'static str> {
    optimizer_passes().iter().map(|pass| pass.name()).collect()
}

pub struct Pipeline {
    steps: Vec<Step>,
    log_stats: bool,
}

impl Pipeline {
    pub fn new(options: &SimplifyOptions) -> Self {
        let known = known_pass_names();
        for name in options.skip_optimizers.iter().flatten() {
            if !known.contains(&name.as_str()) {
                tracing::warn!(optimizer = %name, "ignoring unknown optimizer in skip list");
            }
        }

        let passes: Vec<Arc<dyn GraphPass>> = optimizer_passes()
            .into_iter()
            .filter(|pass| !options.is_skipped(pass.name()))
            .collect();

        let mut builder = PipelineBuilder::new();
        if options.shape_inference {
            builder.pass(Arc::new(ShapeInferencePass));
        }

        let folds = options.constant_folding;
        let infers = options.shape_inference;
        if !passes.is_empty() || folds {
            builder.fixed_point(crate::env::max_iters(), |p| {
                for pass in passes {
                    p.pass(pass);
                }
                if folds {
                    p.pass(Arc::new(ConstantFoldingPass));
                }
                if infers {
                    p.pass(Arc::new(ShapeInferencePass));
                }
            });
        }

        Self {
            steps: builder.finish(),
            log_stats: crate::env::pass_stats_enabled(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(&self, graph: &mut GraphProto, cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let mut totals = PassResult::default();
        run_steps(&self.steps, graph, cx, &mut totals, self.log_stats)?;
        Ok(totals)
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut GraphProto,
    cx: &mut SimplifyContext<'_>,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let _span = tracing::debug_span!("pass", name = pass.name()).entered();
                let stats = pass.run(graph, cx)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    tracing::info!(
                        pass = pass.name(),
                        changed = stats.changed,
                        rewrites = stats.rewrites_applied,
                        erased = stats.erased_nodes,
                        folded = stats.folded_nodes,
                        nodes = graph.node.len(),
                        "pass stats"
                    );
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                while iter < *max_iters {
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, graph, cx, &mut local, log_stats)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}
