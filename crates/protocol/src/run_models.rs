//! Runtime run state models.
//!
//! This module defines the structures for tracking the state of a single
//! simulation run while its pipeline executes, and after it has finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Represents the lifecycle status of a run.
///
/// The status progresses through these states during normal execution:
/// Queued -> Running -> Success
///
/// Terminal states:
/// - Success: every stage reported success
/// - Failed: a stage reported failure
/// - Stopped: an explicit stop request ended the run
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run has been created but its pipeline has not started yet.
    Queued,

    /// Pipeline is actively executing stages.
    Running,

    /// All stages completed successfully.
    Success,

    /// A stage failed; the run's `error` holds the message.
    Failed,

    /// The run was stopped by user request.
    Stopped,
}

impl RunStatus {
    /// Whether no further transitions are possible from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live state of one run, as held by the job registry.
///
/// A run outlives its pipeline: the terminal record stays queryable until
/// operator housekeeping evicts it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct Run {
    /// Opaque identifier, stable for the run's lifetime.
    pub run_id: String,

    /// Current lifecycle status.
    pub status: RunStatus,

    /// Completion percentage (0-100), never decreasing.
    pub progress: u8,

    /// Name of the executing stage, empty before the pipeline starts.
    pub current_stage: String,

    /// Last failure message. Only set when `status` is `Failed`.
    pub error: Option<String>,

    /// When the run was created in the registry.
    pub created_at: DateTime<Utc>,

    /// Stamped on the first transition into `Running`.
    pub started_at: Option<DateTime<Utc>>,

    /// Stamped exactly once, on the first terminal transition.
    pub completed_at: Option<DateTime<Utc>>,

    /// Estimated seconds remaining, recomputed on every progress update.
    ///
    /// Absent while progress is zero.
    pub eta_seconds: Option<f64>,
}

impl Run {
    /// Create a new run in `Queued` state.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Queued,
            progress: 0,
            current_stage: String::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            eta_seconds: None,
        }
    }

    /// Wall-clock seconds between start and completion, when both are known.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// A partial update to a [`Run`].
///
/// Only the fields that are `Some` are merged into the stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub progress: Option<u8>,
    pub current_stage: Option<String>,
    pub error: Option<String>,
}

impl RunUpdate {
    /// Start an update that sets the status.
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.current_stage = Some(stage.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_queued() {
        let run = Run::new("run-1");
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.progress, 0);
        assert!(run.current_stage.is_empty());
        assert!(run.started_at.is_none());
        assert!(run.eta_seconds.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_update_builder() {
        let update = RunUpdate::status(RunStatus::Running)
            .with_progress(25)
            .with_stage("Checking mesh");
        assert_eq!(update.status, Some(RunStatus::Running));
        assert_eq!(update.progress, Some(25));
        assert_eq!(update.current_stage.as_deref(), Some("Checking mesh"));
        assert!(update.error.is_none());
    }
}
