//! Stage definitions and the context handed to each stage.

use crate::exec::{CommandOutput, CommandRequest, LineSink, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wf_protocol::RunSettings;

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub success: bool,
    pub message: String,
}

impl StageOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// The step function of a stage.
///
/// Steps are stateless and reusable across runs; everything run-specific
/// comes from the [`StageContext`]. Returning `Err` is equivalent to a
/// failed outcome carrying the error's message.
#[async_trait]
pub trait StageStep: Send + Sync {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome>;
}

/// A named entry of a pipeline's stage table.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub step: Arc<dyn StageStep>,
}

impl Stage {
    pub fn new(name: impl Into<String>, step: impl StageStep + 'static) -> Self {
        Self {
            name: name.into(),
            step: Arc::new(step),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Everything a stage may use while it runs.
#[derive(Clone)]
pub struct StageContext {
    pub run_id: String,
    /// Root of the case: region subdirectories, or the case itself.
    pub case_dir: PathBuf,
    /// Directory for per-stage transcripts.
    pub logs_dir: PathBuf,
    pub settings: Arc<RunSettings>,
    pub runner: Arc<dyn ProcessRunner>,
    pub sink: Arc<dyn LineSink>,
    /// Output marker that fails tolerant diagnostic stages.
    pub fatal_marker: String,
}

impl StageContext {
    /// Directory the solve stages operate in.
    pub fn solve_dir(&self) -> PathBuf {
        self.settings.solve_dir(&self.case_dir)
    }

    pub fn stage_log(&self, file_name: &str) -> PathBuf {
        self.logs_dir.join(file_name)
    }

    /// Emit an in-process line to the run's subscribers and transcript.
    pub async fn log(&self, line: impl AsRef<str>) {
        self.sink.line(line.as_ref()).await;
    }

    /// Build a request for this run.
    pub fn command(
        &self,
        stage: &str,
        command_line: impl Into<String>,
        work_dir: &Path,
        log_name: &str,
    ) -> CommandRequest {
        CommandRequest::new(
            self.run_id.as_str(),
            stage,
            command_line,
            work_dir,
            self.stage_log(log_name),
        )
    }

    pub async fn execute(&self, request: &CommandRequest) -> CommandOutput {
        self.runner.run(request, self.sink.as_ref()).await
    }
}
