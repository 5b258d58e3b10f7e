//! Audit trail of constant-folding attempts.

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::Serialize;

/// One attempt to fold a node into constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoldedOp {
    pub op_type: String,
    pub op_name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub success: bool,
    pub error_msg: String,
}

impl FoldedOp {
    pub fn succeeded(
        op_type: impl Into<String>,
        op_name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            op_name: op_name.into(),
            inputs,
            outputs,
            success: true,
            error_msg: String::new(),
        }
    }

    pub fn failed(
        op_type: impl Into<String>,
        op_name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        error_msg: impl Into<String>,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            op_name: op_name.into(),
            inputs,
            outputs,
            success: false,
            error_msg: error_msg.into(),
        }
    }
}

/// Ordered fold attempts plus running totals.
///
/// `total_attempted == total_succeeded + total_failed == folded_ops.len()` holds after every
/// mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FoldingRecord {
    pub folded_ops: Vec<FoldedOp>,
    pub total_attempted: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
}

impl FoldingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fold(&mut self, op: FoldedOp) {
        self.total_attempted += 1;
        if op.success {
            self.total_succeeded += 1;
        } else {
            self.total_failed += 1;
        }
        self.folded_ops.push(op);
    }

    pub fn clear(&mut self) {
        self.folded_ops.clear();
        self.total_attempted = 0;
        self.total_succeeded = 0;
        self.total_failed = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.folded_ops.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.total_attempted == self.total_succeeded + self.total_failed
            && self.total_attempted == self.folded_ops.len()
            && self.total_succeeded == self.folded_ops.iter().filter(|op| op.success).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Shared, lock-guarded [`FoldingRecord`].
///
/// Entries and counters change under one lock, so [`FoldingLog::snapshot`] never observes a
/// half-applied append.
#[derive(Debug, Default)]
pub struct FoldingLog {
    record: Mutex<FoldingRecord>,
}

impl FoldingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: FoldedOp) {
        self.record
            .lock()
            .expect("folding log poisoned")
            .record_fold(op);
    }

    pub fn clear(&self) {
        self.record.lock().expect("folding log poisoned").clear();
    }

    /// Copy of the current entries and counters; later writes do not affect it.
    pub fn snapshot(&self) -> FoldingRecord {
        self.record.lock().expect("folding log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.record
            .lock()
            .expect("folding log poisoned")
            .folded_ops
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_LOG: Lazy<Arc<FoldingLog>> = Lazy::new(|| Arc::new(FoldingLog::new()));

/// Process-wide log written by the free simplify functions and the C boundary.
pub fn global() -> Arc<FoldingLog> {
    Arc::clone(&GLOBAL_LOG)
}

/// Snapshot of the process-wide log.
pub fn folding_record() -> FoldingRecord {
    GLOBAL_LOG.snapshot()
}

pub fn clear_folding_record() {
    GLOBAL_LOG.clear();
}
