use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::env::init_env;
use crate::error::{Result, SimplifyError};
use crate::executor::{self, ExecutorRegistry};
use crate::folding::{self, FoldingLog};
use crate::graph;
use crate::optimizer::{Pipeline, SimplifyContext};
use crate::options::SimplifyOptions;
use crate::proto::{decode_model, encode_model, ModelProto};

/// Simplification entry point bound to an executor registry and a folding log.
///
/// Tests build one per case with private collaborators; [`Simplifier::global`] shares the
/// process-wide instances with the C boundary.
#[derive(Debug, Clone)]
pub struct Simplifier {
    executor: Arc<ExecutorRegistry>,
    folding: Arc<FoldingLog>,
}

impl Simplifier {
    pub fn new(executor: Arc<ExecutorRegistry>, folding: Arc<FoldingLog>) -> Self {
        Self { executor, folding }
    }

    pub fn global() -> Self {
        Self::new(executor::global(), folding::global())
    }

    pub fn executor(&self) -> &Arc<ExecutorRegistry> {
        &self.executor
    }

    pub fn folding(&self) -> &Arc<FoldingLog> {
        &self.folding
    }

    /// Returns a simplified copy of `model`.
    pub fn simplify(&self, model: &ModelProto, options: &SimplifyOptions) -> Result<ModelProto> {
        let mut model = model.clone();
        self.simplify_in_place(&mut model, options)?;
        Ok(model)
    }

    /// Simplifies `model` in place and reports whether any pass rewrote it.
    fn simplify_in_place(&self, model: &mut ModelProto, options: &SimplifyOptions) -> Result<bool> {
        init_env();
        let ir_version = model.ir_version;
        let opset_import = model.opset_import.clone();
        let graph = model
            .graph
            .as_mut()
            .ok_or_else(|| SimplifyError::rejected("model has no graph"))?;
        graph::validate(graph)?;

        let _span = tracing::debug_span!(
            "simplify",
            graph = %graph.name,
            nodes = graph.node.len(),
            constant_folding = options.constant_folding,
            shape_inference = options.shape_inference,
        )
        .entered();

        let pipeline = Pipeline::new(options);
        let mut cx = SimplifyContext::new(
            &self.executor,
            &self.folding,
            options,
            ir_version,
            opset_import,
        );
        let stats = pipeline.run(graph, &mut cx)?;
        tracing::debug!(
            nodes = graph.node.len(),
            rewrites = stats.rewrites_applied,
            folded = stats.folded_nodes,
            "simplify finished"
        );
        Ok(stats.changed)
    }

    /// Decodes, simplifies, and re-encodes a serialized model.
    ///
    /// When no pass rewrites the graph the input bytes are returned as they are, so fields and
    /// encodings the codec does not reproduce exactly are never lost.
    pub fn simplify_bytes(&self, model_bytes: &[u8], options: &SimplifyOptions) -> Result<Vec<u8>> {
        let mut model = decode_model(model_bytes)?;
        if !self.simplify_in_place(&mut model, options)? {
            return Ok(model_bytes.to_vec());
        }
        encode_model(&model)
    }

    /// Reads a model from `in_path` and writes the simplified model to `out_path`.
    pub fn simplify_path(
        &self,
        in_path: impl AsRef<Path>,
        out_path: impl AsRef<Path>,
        options: &SimplifyOptions,
    ) -> Result<()> {
        let in_path = in_path.as_ref();
        let out_path = out_path.as_ref();
        let bytes = fs::read(in_path).map_err(|err| SimplifyError::io(in_path, err))?;
        let output = self.simplify_bytes(&bytes, options)?;
        fs::write(out_path, output).map_err(|err| SimplifyError::io(out_path, err))
    }
}

/// Simplifies `model` with the process-wide executor and folding log.
pub fn simplify(model: &ModelProto, options: SimplifyOptions) -> Result<ModelProto> {
    Simplifier::global().simplify(model, &options)
}

/// Simplify a serialized ONNX model.
///
/// # Example
///
/// ```no_run
/// use onnxsim::{init_env, simplify_bytes, SimplifyOptions};
///
/// init_env();
/// let model_bytes = std::fs::read("model.onnx").unwrap();
/// let simplified = simplify_bytes(&model_bytes, SimplifyOptions::default()).unwrap();
/// std::fs::write("simplified.onnx", simplified).unwrap();
/// ```
pub fn simplify_bytes(model_bytes: &[u8], options: SimplifyOptions) -> Result<Vec<u8>> {
    Simplifier::global().simplify_bytes(model_bytes, &options)
}

/// Simplify an ONNX model file.
///
/// ```no_run
/// use onnxsim::{simplify_file, SimplifyOptions};
///
/// simplify_file("model.onnx", "simplified.onnx", SimplifyOptions::default()).unwrap();
/// ```
pub fn simplify_file<P: AsRef<Path>>(
    in_path: P,
    out_path: P,
    options: SimplifyOptions,
) -> Result<()> {
    Simplifier::global().simplify_path(in_path, out_path, &options)
}
