//! ONNX model simplification with delegated constant folding.
//!
//! The simplifier rewrites graphs but never computes tensors itself: constant folding hands
//! each foldable node to the [`ModelExecutor`] registered in an [`ExecutorRegistry`] and
//! records every attempt in a [`FoldingLog`].

mod env;
pub mod error;
pub mod executor;
pub mod folding;
mod graph;
pub mod optimizer;
pub mod options;
pub mod passes;
pub mod proto;
mod simplify;

pub use env::init_env;
pub use error::{Result, SimplifyError};
pub use executor::{ExecutorError, ExecutorRegistry, ModelExecutor};
pub use folding::{clear_folding_record, folding_record, FoldedOp, FoldingLog, FoldingRecord};
pub use options::SimplifyOptions;
pub use simplify::{simplify, simplify_bytes, simplify_file, Simplifier};
