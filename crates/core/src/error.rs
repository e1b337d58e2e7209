//! Error types for the orchestration core.

use crate::configurator::dictionary::DictError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by orchestration operations and collaborators.
///
/// Stage failures are not errors at this level: a failing stage becomes a
/// terminal `failed` run. These variants cover the cases where an operation
/// cannot proceed at all.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stage's required input is absent.
    #[error("Missing precondition: {0}")]
    MissingPrecondition(String),

    /// A run id that is not a single plain path component.
    #[error("Invalid run id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidRunId(String),

    #[error("Run {0} not found")]
    UnknownRun(String),

    /// A start request named a run that is still executing.
    #[error("Run {0} is already active")]
    RunActive(String),

    /// Eviction was requested for a run that has not reached a terminal state.
    #[error("Run {0} has not finished")]
    RunNotFinished(String),

    /// The run record store could not be read or written.
    #[error("Run records at {path}: {reason}")]
    Recorder { path: PathBuf, reason: String },

    /// A case dictionary could not be edited.
    #[error("Failed to edit {path}: {source}")]
    Dictionary { path: PathBuf, source: DictError },

    /// A written setting did not read back as requested.
    #[error("Settings verification failed: {0}")]
    Verification(String),
}

impl WorkflowError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Type alias for Result with WorkflowError.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
