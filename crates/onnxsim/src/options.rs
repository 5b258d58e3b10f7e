/// Per-call simplification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimplifyOptions {
    /// Optimizer passes to disable. `None` runs every pass.
    pub skip_optimizers: Option<Vec<String>>,

    /// Fold constant sub-graphs through the registered executor.
    pub constant_folding: bool,

    /// Propagate static shapes into `graph.value_info`.
    pub shape_inference: bool,

    /// Largest folded result, in elements, that replaces its node. `0` disables the limit.
    pub tensor_size_threshold: usize,
}

impl SimplifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant_folding(mut self, enabled: bool) -> Self {
        self.constant_folding = enabled;
        self
    }

    pub fn with_shape_inference(mut self, enabled: bool) -> Self {
        self.shape_inference = enabled;
        self
    }

    pub fn with_skip_optimizers(mut self, optimizers: Vec<String>) -> Self {
        self.skip_optimizers = Some(optimizers);
        self
    }

    pub fn with_tensor_size_threshold(mut self, threshold: usize) -> Self {
        self.tensor_size_threshold = threshold;
        self
    }

    pub fn is_skipped(&self, pass: &str) -> bool {
        self.skip_optimizers
            .as_ref()
            .is_some_and(|skip| skip.iter().any(|name| name == pass))
    }

    /// Whether a folded result of `elements` elements is within the threshold.
    pub fn within_size_threshold(&self, elements: usize) -> bool {
        self.tensor_size_threshold == 0 || elements <= self.tensor_size_threshold
    }
}
