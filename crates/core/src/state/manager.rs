//! Orchestrator for all runs of this process.
//!
//! The Orchestrator owns the [`JobRegistry`], the [`LogBroadcaster`] and the
//! collaborators, and is the single entry point for starting, stopping,
//! querying and observing runs. Each started run executes its stage table
//! as an independent tokio task keyed by run id.

use crate::broadcast::{LogBroadcaster, SubscriberTx};
use crate::config::models::AppConfig;
use crate::configurator::{CaseConfigurator, FoamCaseConfigurator};
use crate::engine::{StageContext, StagePipeline};
use crate::error::{WorkflowError, WorkflowResult};
use crate::exec::{ProcessRunner, RunLogSink, ShellProcessRunner};
use crate::recorder::{JsonRunRecorder, RunLifecycleRecorder};
use crate::stages;
use crate::state::registry::JobRegistry;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use wf_protocol::{PipelineKind, Run, RunSettings, RunStatus, RunUpdate};

/// Upper bound keeping the eviction cutoff representable.
const MAX_RETENTION_HOURS: i64 = 24 * 365 * 100;

/// Parameters of a new run.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub run_id: String,
    pub kind: PipelineKind,
    pub case_dir: PathBuf,
    pub settings: RunSettings,
}

/// Manages every run of this process.
///
/// The Orchestrator provides a centralized interface for:
/// - Starting pipelines in the background
/// - Stopping runs
/// - Querying run state
/// - Attaching and detaching log subscribers
/// - Evicting finished runs
pub struct Orchestrator {
    config: AppConfig,
    registry: JobRegistry,
    broadcaster: Arc<LogBroadcaster>,
    runner: Arc<dyn ProcessRunner>,
    recorder: Arc<dyn RunLifecycleRecorder>,
    configurator: Arc<dyn CaseConfigurator>,

    /// Pipeline tasks not yet awaited, indexed by run id.
    tasks: Mutex<HashMap<String, JoinHandle<Run>>>,
}

impl Orchestrator {
    /// Create an Orchestrator with the shell runner, the JSON run recorder
    /// and the dictionary configurator, all configured from `config`.
    pub fn new(config: AppConfig) -> Self {
        let registry = JobRegistry::new();
        let broadcaster = Arc::new(LogBroadcaster::new(
            config.logs_dir.clone(),
            config.replay_lines,
        ));
        let runner = Arc::new(ShellProcessRunner::from_config(&config, registry.clone()));
        let recorder = Arc::new(JsonRunRecorder::new(&config.metadata_dir));

        Self {
            config,
            registry,
            broadcaster,
            runner,
            recorder,
            configurator: Arc::new(FoamCaseConfigurator),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the process runner. A runner that registers processes must
    /// share [`Orchestrator::registry`] for stop requests to reach them.
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunLifecycleRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_configurator(mut self, configurator: Arc<dyn CaseConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<LogBroadcaster> {
        &self.broadcaster
    }

    /// Start a pipeline in the background.
    ///
    /// The run id is reserved in `queued` state, its durable transcript is
    /// reset, and the stage table is spawned as a tokio task. The queued
    /// record is returned immediately; use [`Orchestrator::wait`] for the
    /// terminal state.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::InvalidRunId`] if the id is not a plain path
    ///   component.
    /// - [`WorkflowError::MissingPrecondition`] if the case directory does
    ///   not exist.
    /// - [`WorkflowError::RunActive`] if the run id is still executing,
    ///   including when another start for it is in flight.
    /// - [`WorkflowError::Io`] if the run's log directory cannot be created.
    ///   The reserved run is then marked failed.
    ///
    /// A finished run with the same id is replaced.
    pub async fn start(&self, request: StartRequest) -> WorkflowResult<Run> {
        let StartRequest {
            run_id,
            kind,
            case_dir,
            settings,
        } = request;

        validate_run_id(&run_id)?;
        if !case_dir.is_dir() {
            return Err(WorkflowError::MissingPrecondition(format!(
                "case directory {} does not exist",
                case_dir.display()
            )));
        }

        let (run, replaced) = self.registry.try_create(&run_id).await?;
        if replaced.is_some() {
            self.tasks.lock().await.remove(&run_id);
        }

        let logs_dir = self.config.stage_logs_dir(&run_id);
        for dir in [&logs_dir, &self.config.logs_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                let err = WorkflowError::io(dir, e);
                self.registry
                    .update(
                        &run_id,
                        RunUpdate::status(RunStatus::Failed).with_error(err.to_string()),
                    )
                    .await;
                return Err(err);
            }
        }

        self.broadcaster.reset(&run_id).await;

        let settings = Arc::new(settings);
        let stages = stages::build(kind, &settings, Arc::clone(&self.configurator));
        let ctx = StageContext {
            run_id: run_id.clone(),
            case_dir,
            logs_dir,
            settings,
            runner: Arc::clone(&self.runner),
            sink: Arc::new(RunLogSink::new(Arc::clone(&self.broadcaster), &run_id)),
            fatal_marker: self.config.fatal_marker.clone(),
        };
        let pipeline = StagePipeline::new(
            self.registry.clone(),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.recorder),
        );

        info!(run_id = %run_id, pipeline = %kind, stages = stages.len(), "starting run");
        let task_id = run_id.clone();
        let handle = tokio::spawn(async move { pipeline.run(&task_id, &stages, &ctx).await });
        self.tasks.lock().await.insert(run_id, handle);

        Ok(run)
    }

    /// Request a stop.
    ///
    /// Returns `true` if an active process was signalled, `false` if none
    /// was running; in both cases a non-terminal run is flagged and ends as
    /// `stopped` at its next stage boundary.
    pub async fn stop(&self, run_id: &str) -> WorkflowResult<bool> {
        if self.registry.get(run_id).await.is_none() {
            return Err(WorkflowError::UnknownRun(run_id.to_string()));
        }
        let signalled = self.registry.cancel(run_id).await;
        info!(run_id, signalled, "stop requested");
        Ok(signalled)
    }

    pub async fn status(&self, run_id: &str) -> Option<Run> {
        self.registry.get(run_id).await
    }

    pub async fn list(&self, status: Option<RunStatus>) -> Vec<Run> {
        self.registry.list(status).await
    }

    /// Attach a subscriber; history is replayed before live events.
    pub async fn attach(&self, run_id: &str, tx: SubscriberTx) -> Uuid {
        self.broadcaster.attach(run_id, tx).await
    }

    pub async fn subscribe(&self, run_id: &str) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        self.broadcaster.subscribe(run_id).await
    }

    pub async fn detach(&self, run_id: &str, subscriber: Uuid) {
        self.broadcaster.detach(run_id, subscriber).await;
    }

    pub async fn handle_client_message(&self, run_id: &str, subscriber: Uuid, text: &str) {
        self.broadcaster
            .handle_client_message(run_id, subscriber, text)
            .await;
    }

    /// Wait for a run's pipeline to finish and return its terminal state.
    ///
    /// Only the first caller awaits the task; later callers, and callers
    /// for runs whose task was already awaited, get the registry's current
    /// record.
    pub async fn wait(&self, run_id: &str) -> WorkflowResult<Run> {
        let handle = self.tasks.lock().await.remove(run_id);
        if let Some(handle) = handle {
            match handle.await {
                Ok(run) => return Ok(run),
                Err(e) => warn!(run_id, error = %e, "pipeline task ended abnormally"),
            }
        }
        self.registry
            .get(run_id)
            .await
            .ok_or_else(|| WorkflowError::UnknownRun(run_id.to_string()))
    }

    /// Remove a finished run and its subscribers.
    pub async fn evict(&self, run_id: &str) -> WorkflowResult<Run> {
        let run = self.registry.evict(run_id).await?;
        self.broadcaster.forget(run_id).await;
        self.tasks.lock().await.remove(run_id);
        Ok(run)
    }

    /// Evict every run that finished more than `retention_hours` ago.
    pub async fn evict_expired(&self) -> Vec<String> {
        let retention = i64::try_from(self.config.retention_hours)
            .unwrap_or(MAX_RETENTION_HOURS)
            .min(MAX_RETENTION_HOURS);
        let cutoff = Utc::now() - Duration::hours(retention);
        let evicted = self.registry.evict_completed_before(cutoff).await;
        let mut tasks = self.tasks.lock().await;
        for run_id in &evicted {
            self.broadcaster.forget(run_id).await;
            tasks.remove(run_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted expired runs");
        }
        evicted
    }
}

/// Accept only ids that are one plain path component.
///
/// Run ids name the durable transcript and the run directory, so `/`, `..`
/// and the like would escape the configured directories.
pub fn validate_run_id(run_id: &str) -> WorkflowResult<()> {
    let plain = !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plain {
        Ok(())
    } else {
        Err(WorkflowError::InvalidRunId(run_id.to_string()))
    }
}

/// A fresh run id: the slugged `name`, a UTC timestamp and a random suffix.
pub fn generate_run_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "run" } else { slug };
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{slug}-{}-{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> AppConfig {
        AppConfig {
            toolkit_env: String::new(),
            ..AppConfig::default()
        }
        .resolve_paths(root)
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id("Wind Tunnel #3");
        assert!(id.starts_with("wind-tunnel--3-"), "{id}");
        assert_ne!(generate_run_id("x"), generate_run_id("x"));
        assert!(generate_run_id("  ").starts_with("run-"));
    }

    #[test]
    fn test_validate_run_id() {
        for ok in ["tunnel-1", "prop_2.v3", "a"] {
            assert!(validate_run_id(ok).is_ok(), "{ok}");
        }
        assert!(validate_run_id(&generate_run_id("Wind Tunnel #3")).is_ok());
        for bad in ["", ".", "..", "../x", "a/b", "/abs", "a b", "r\\1"] {
            assert!(
                matches!(validate_run_id(bad), Err(WorkflowError::InvalidRunId(_))),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_start_rejects_escaping_run_id() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("root");
        let case = root.join("case");
        std::fs::create_dir_all(&case).expect("case dir");
        let orchestrator = Orchestrator::new(test_config(&root));

        let result = orchestrator
            .start(StartRequest {
                run_id: "../../escaped".into(),
                kind: PipelineKind::Mesh,
                case_dir: case,
                settings: RunSettings::default(),
            })
            .await;

        assert!(matches!(result, Err(WorkflowError::InvalidRunId(_))));
        assert!(orchestrator.list(None).await.is_empty());
        assert!(!dir.path().join("escaped.log").exists());
        assert!(!dir.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn test_stop_unknown_run() {
        let dir = tempdir().expect("Failed to create temp dir");
        let orchestrator = Orchestrator::new(test_config(dir.path()));
        let result = orchestrator.stop("nope").await;
        assert!(matches!(result, Err(WorkflowError::UnknownRun(_))));
    }

    #[tokio::test]
    async fn test_start_requires_case_dir() {
        let dir = tempdir().expect("Failed to create temp dir");
        let orchestrator = Orchestrator::new(test_config(dir.path()));

        let result = orchestrator
            .start(StartRequest {
                run_id: "r1".into(),
                kind: PipelineKind::Mesh,
                case_dir: dir.path().join("missing"),
                settings: RunSettings::default(),
            })
            .await;

        assert!(matches!(result, Err(WorkflowError::MissingPrecondition(_))));
        assert!(orchestrator.status("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_wait_unknown_run() {
        let dir = tempdir().expect("Failed to create temp dir");
        let orchestrator = Orchestrator::new(test_config(dir.path()));
        assert!(matches!(
            orchestrator.wait("nope").await,
            Err(WorkflowError::UnknownRun(_))
        ));
    }
}
