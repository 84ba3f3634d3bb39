use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failures of a single scoring invocation.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to start scoring process `{program}`: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scoring process reported diagnostics: {diagnostics}")]
    ProcessExecution { diagnostics: String },
    #[error("scoring process produced no output")]
    EmptyOutput,
    #[error("scoring process output is not a valid response ({reason}): {raw}")]
    InvalidOutputFormat { raw: String, reason: String },
    #[error("prediction failed: {detail}")]
    PredictionFailure { detail: String },
    #[error("scoring process did not finish within {timeout:?}")]
    ProcessTimeout { timeout: Duration },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write report: {0}")]
    Stream(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProcessSpawnError,
    ProcessExecutionError,
    EmptyOutputError,
    InvalidOutputFormatError,
    PredictionFailure,
    ProcessTimeoutError,
    RenderStreamError,
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::ProcessSpawn { .. } => ErrorKind::ProcessSpawnError,
            InferenceError::ProcessExecution { .. } => ErrorKind::ProcessExecutionError,
            InferenceError::EmptyOutput => ErrorKind::EmptyOutputError,
            InferenceError::InvalidOutputFormat { .. } => ErrorKind::InvalidOutputFormatError,
            InferenceError::PredictionFailure { .. } => ErrorKind::PredictionFailure,
            InferenceError::ProcessTimeout { .. } => ErrorKind::ProcessTimeoutError,
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Inference(err) => err.kind(),
            PipelineError::Render(_) => ErrorKind::RenderStreamError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
