//! Graph simplification passes.

mod constant_folding;
mod eliminate_deadend;
mod eliminate_identity;
mod eliminate_nop_dropout;
mod eliminate_nop_transpose;
mod eliminate_unused_initializer;
mod forwarding;
mod shape_inference;

pub use constant_folding::ConstantFoldingPass;
pub use eliminate_deadend::EliminateDeadEndPass;
pub use eliminate_identity::EliminateIdentityPass;
pub use eliminate_nop_dropout::EliminateNopDropoutPass;
pub use eliminate_nop_transpose::EliminateNopTransposePass;
pub use eliminate_unused_initializer::EliminateUnusedInitializerPass;
pub use shape_inference::ShapeInferencePass;

pub use crate::optimizer::{GraphPass, PassResult};
