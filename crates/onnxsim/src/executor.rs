//! Delegated tensor execution.
//!
//! The simplifier has no numeric kernels of its own. Constant folding hands single-node
//! models to whatever [`ModelExecutor`] the host registered here: a reference interpreter,
//! an accelerated runtime, or a deterministic stub in tests.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::proto::{ModelProto, TensorProto};

/// Capability that evaluates a model on concrete inputs.
pub trait ModelExecutor: Send + Sync {
    /// Runs `model` with `inputs` bound positionally to its graph inputs and returns one
    /// tensor per graph output.
    fn run(&self, model: &ModelProto, inputs: &[TensorProto]) -> anyhow::Result<Vec<TensorProto>>;
}

impl<F> ModelExecutor for F
where
    F: Fn(&ModelProto, &[TensorProto]) -> anyhow::Result<Vec<TensorProto>> + Send + Sync,
{
    fn run(&self, model: &ModelProto, inputs: &[TensorProto]) -> anyhow::Result<Vec<TensorProto>> {
        self(model, inputs)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no executor bound")]
    NoExecutorBound,
    #[error(transparent)]
    Execution(anyhow::Error),
}

/// Slot holding the executor shared by every simplify call that uses it.
///
/// Replacement swaps the whole `Arc`, so a call already holding the previous executor keeps
/// it alive until it finishes.
#[derive(Default)]
pub struct ExecutorRegistry {
    slot: RwLock<Option<Arc<dyn ModelExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executor(executor: Arc<dyn ModelExecutor>) -> Self {
        Self {
            slot: RwLock::new(Some(executor)),
        }
    }

    /// Replaces the registered executor. Last writer wins.
    pub fn set_executor(&self, executor: Arc<dyn ModelExecutor>) {
        *self.slot.write().expect("executor registry poisoned") = Some(executor);
    }

    pub fn clear_executor(&self) {
        *self.slot.write().expect("executor registry poisoned") = None;
    }

    pub fn current(&self) -> Option<Arc<dyn ModelExecutor>> {
        self.slot.read().expect("executor registry poisoned").clone()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().expect("executor registry poisoned").is_some()
    }

    /// Runs `model` on the registered executor.
    ///
    /// The read lock is released before delegating so a slow executor never blocks
    /// re-registration.
    pub fn run(
        &self,
        model: &ModelProto,
        inputs: &[TensorProto],
    ) -> Result<Vec<TensorProto>, ExecutorError> {
        let executor = self.current().ok_or(ExecutorError::NoExecutorBound)?;
        executor.run(model, inputs).map_err(ExecutorError::Execution)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("bound", &self.is_bound())
            .finish()
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<ExecutorRegistry>> =
    Lazy::new(|| Arc::new(ExecutorRegistry::new()));

/// Process-wide registry used by the free simplify functions and the C boundary.
pub fn global() -> Arc<ExecutorRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}

/// Registers `executor` on the process-wide registry.
pub fn set_executor(executor: Arc<dyn ModelExecutor>) {
    GLOBAL_REGISTRY.set_executor(executor);
}
