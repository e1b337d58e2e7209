//! Pipeline execution engine.
//!
//! The StagePipeline runs a stage table for one run: it advances stage by
//! stage, reports progress through the [`JobRegistry`] and the
//! [`LogBroadcaster`], halts on the first failure, and decides between
//! `failed` and `stopped` from the registry's stop flag.

pub mod stage;

pub use stage::{Stage, StageContext, StageOutcome, StageStep};

use crate::broadcast::LogBroadcaster;
use crate::recorder::RunLifecycleRecorder;
use crate::state::registry::JobRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use wf_protocol::{LogEvent, Run, RunStatus, RunUpdate};

pub const COMPLETE_MESSAGE: &str = "Workflow completed successfully";

/// Drives a stage table to a terminal run state.
#[derive(Clone)]
pub struct StagePipeline {
    registry: JobRegistry,
    broadcaster: Arc<LogBroadcaster>,
    recorder: Arc<dyn RunLifecycleRecorder>,
}

impl StagePipeline {
    pub fn new(
        registry: JobRegistry,
        broadcaster: Arc<LogBroadcaster>,
        recorder: Arc<dyn RunLifecycleRecorder>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            recorder,
        }
    }

    /// Execute `stages` for `run_id` and return the terminal run state.
    ///
    /// The run must already exist in the registry. For stage `i` of `N` the
    /// run's progress is `i * 100 / N` while the stage executes; a
    /// successful pipeline ends at 100. A failing stage halts the pipeline:
    /// the run becomes `stopped` if a stop was requested, otherwise `failed`
    /// with the stage's message. No earlier stage is rolled back.
    pub async fn run(&self, run_id: &str, stages: &[Stage], ctx: &StageContext) -> Run {
        let total = stages.len();
        let first = stages.first().map(|s| s.name.clone()).unwrap_or_default();
        self.registry
            .update(
                run_id,
                RunUpdate::status(RunStatus::Running)
                    .with_stage(first)
                    .with_progress(0),
            )
            .await;

        if let Err(e) = self.recorder.record_start(run_id, &ctx.settings).await {
            warn!(run_id, error = %e, "failed to record run start");
        }
        info!(run_id, stages = total, "pipeline started");

        let mut outcome_status = RunStatus::Success;
        for (index, stage) in stages.iter().enumerate() {
            if self.registry.is_stop_requested(run_id).await {
                outcome_status = self.stop(run_id, &stage.name).await;
                break;
            }

            let progress = percent(index, total);
            self.registry
                .update(
                    run_id,
                    RunUpdate::default()
                        .with_stage(stage.name.as_str())
                        .with_progress(progress),
                )
                .await;
            self.broadcaster
                .broadcast(
                    run_id,
                    &LogEvent::Progress {
                        step: stage.name.clone(),
                        progress,
                        step_num: index + 1,
                        total_steps: total,
                    },
                )
                .await;
            info!(run_id, stage = %stage.name, step = index + 1, total, "stage started");

            let outcome = match stage.step.run(ctx).await {
                Ok(outcome) => outcome,
                Err(e) => StageOutcome::failure(format!("{e:#}")),
            };

            if outcome.success {
                if !outcome.message.is_empty() {
                    self.broadcaster
                        .broadcast(
                            run_id,
                            &LogEvent::log(format!("[{}] {}", stage.name, outcome.message)),
                        )
                        .await;
                }
                continue;
            }

            if self.registry.is_stop_requested(run_id).await {
                outcome_status = self.stop(run_id, &stage.name).await;
            } else {
                warn!(run_id, stage = %stage.name, message = %outcome.message, "stage failed");
                self.broadcaster
                    .broadcast(
                        run_id,
                        &LogEvent::Error {
                            step: stage.name.clone(),
                            message: outcome.message.clone(),
                        },
                    )
                    .await;
                self.registry
                    .update(
                        run_id,
                        RunUpdate::status(RunStatus::Failed).with_error(outcome.message),
                    )
                    .await;
                outcome_status = RunStatus::Failed;
            }
            break;
        }

        if outcome_status == RunStatus::Success {
            self.registry
                .update(
                    run_id,
                    RunUpdate::status(RunStatus::Success).with_progress(100),
                )
                .await;
            self.broadcaster
                .broadcast(
                    run_id,
                    &LogEvent::Progress {
                        step: stages.last().map(|s| s.name.clone()).unwrap_or_default(),
                        progress: 100,
                        step_num: total,
                        total_steps: total,
                    },
                )
                .await;
            self.broadcaster
                .broadcast(
                    run_id,
                    &LogEvent::Complete {
                        message: COMPLETE_MESSAGE.to_string(),
                    },
                )
                .await;
        }

        let run = self
            .registry
            .get(run_id)
            .await
            .unwrap_or_else(|| Run::new(run_id));
        info!(run_id, status = %run.status, "pipeline finished");

        let completed_at = run.completed_at.unwrap_or_else(Utc::now);
        let started_at = run.started_at.unwrap_or(completed_at);
        if let Err(e) = self
            .recorder
            .record_completion(run_id, &ctx.settings, started_at, completed_at, run.status)
            .await
        {
            warn!(run_id, error = %e, "failed to record run completion");
        }

        run
    }

    async fn stop(&self, run_id: &str, stage: &str) -> RunStatus {
        info!(run_id, stage, "pipeline stopped by request");
        self.broadcaster
            .broadcast(run_id, &LogEvent::log(format!("[{stage}] Stopped by user")))
            .await;
        self.registry
            .update(run_id, RunUpdate::status(RunStatus::Stopped))
            .await;
        RunStatus::Stopped
    }
}

fn percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(index * 100 / total).unwrap_or(100)
}
