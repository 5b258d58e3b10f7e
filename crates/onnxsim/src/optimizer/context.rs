use std::collections::HashSet;

use crate::executor::ExecutorRegistry;
use crate::folding::{FoldedOp, FoldingLog};
use crate::options::SimplifyOptions;
use crate::proto::OperatorSetIdProto;

/// State shared by the passes of one simplify call.
pub struct SimplifyContext<'a> {
    executor: &'a ExecutorRegistry,
    folding: &'a FoldingLog,
    options: &'a SimplifyOptions,
    ir_version: i64,
    opset_import: Vec<OperatorSetIdProto>,
    failed_folds: HashSet<String>,
}

impl<'a> SimplifyContext<'a> {
    pub fn new(
        executor: &'a ExecutorRegistry,
        folding: &'a FoldingLog,
        options: &'a SimplifyOptions,
        ir_version: i64,
        opset_import: Vec<OperatorSetIdProto>,
    ) -> Self {
        Self {
            executor,
            folding,
            options,
            ir_version,
            opset_import,
            failed_folds: HashSet::new(),
        }
    }

    pub fn executor(&self) -> &'a ExecutorRegistry {
        self.executor
    }

    pub fn options(&self) -> &'a SimplifyOptions {
        self.options
    }

    pub fn ir_version(&self) -> i64 {
        self.ir_version
    }

    pub fn opset_import(&self) -> &[OperatorSetIdProto] {
        &self.opset_import
    }

    pub fn record_fold(&self, op: FoldedOp) {
        self.folding.record(op);
    }

    /// Whether folding the node identified by `key` already failed during this call.
    pub fn is_failed_fold(&self, key: &str) -> bool {
        self.failed_folds.contains(key)
    }

    pub fn mark_failed_fold(&mut self, key: impl Into<String>) {
        self.failed_folds.insert(key.into());
    }
}
