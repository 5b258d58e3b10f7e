use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::executor::ExecutorError;

/// Failures surfaced by the simplifier.
///
/// Each variant corresponds to one stage of a simplify call; the C boundary maps them onto
/// discrete status codes.
#[derive(Debug, Error)]
pub enum SimplifyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to parse model protobuf: {0}")]
    ParseFailed(String),

    #[error("failed to serialize simplified model: {0}")]
    SerializeFailed(String),

    #[error("simplification failed: {0}")]
    SimplificationFailed(String),

    #[error("no executor bound: register a model executor before constant folding")]
    NoExecutorBound,

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SimplifyError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SimplifyError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SimplifyError::SimplificationFailed(reason.into())
    }
}

impl From<ExecutorError> for SimplifyError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::NoExecutorBound => SimplifyError::NoExecutorBound,
            ExecutorError::Execution(err) => SimplifyError::Internal(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimplifyError>;
