//! Durable record of what each run was asked to do and how it ended.

use crate::error::{WorkflowError, WorkflowResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use wf_protocol::{RunSettings, RunStatus};

/// Collaborator notified at run start and at the terminal transition.
///
/// Failures are reported to the caller, which logs and otherwise ignores
/// them; bookkeeping must never fail a run.
#[async_trait]
pub trait RunLifecycleRecorder: Send + Sync {
    async fn record_start(&self, run_id: &str, settings: &RunSettings) -> WorkflowResult<()>;

    async fn record_completion(
        &self,
        run_id: &str,
        settings: &RunSettings,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: RunStatus,
    ) -> WorkflowResult<()>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl From<RunStatus> for RecordStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued | RunStatus::Running => Self::Running,
            RunStatus::Success => Self::Completed,
            RunStatus::Failed => Self::Failed,
            RunStatus::Stopped => Self::Stopped,
        }
    }
}

/// One entry of `runs.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RecordStatus,
    pub settings: RunSettings,
    pub solve_started_at: Option<DateTime<Utc>>,
    pub solve_completed_at: Option<DateTime<Utc>>,
    pub solve_duration_seconds: Option<f64>,
    pub success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keeps all records in a single JSON object keyed by run id.
///
/// Writes go to a temporary file that is then renamed over the store.
pub struct JsonRunRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonRunRecorder {
    pub const FILE_NAME: &'static str = "runs.json";

    pub fn new(metadata_dir: impl AsRef<Path>) -> Self {
        Self {
            path: metadata_dir.as_ref().join(Self::FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, most recently updated first.
    pub async fn list(&self) -> WorkflowResult<Vec<RunRecord>> {
        let _guard = self.lock.lock().await;
        let mut records: Vec<RunRecord> = self.load().await?.into_values().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    pub async fn get(&self, run_id: &str) -> WorkflowResult<Option<RunRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(run_id))
    }

    async fn load(&self) -> WorkflowResult<BTreeMap<String, RunRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(WorkflowError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| WorkflowError::Recorder {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn store(&self, records: &BTreeMap<String, RunRecord>) -> WorkflowResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkflowError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(records).map_err(|e| WorkflowError::Recorder {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| WorkflowError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| WorkflowError::io(&self.path, e))
    }

    async fn modify<F>(&self, run_id: &str, settings: &RunSettings, f: F) -> WorkflowResult<()>
    where
        F: FnOnce(&mut RunRecord) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let now = Utc::now();
        let record = records
            .entry(run_id.to_string())
            .or_insert_with(|| RunRecord {
                run_id: run_id.to_string(),
                status: RecordStatus::Running,
                settings: settings.clone(),
                solve_started_at: None,
                solve_completed_at: None,
                solve_duration_seconds: None,
                success: None,
                created_at: now,
                updated_at: now,
            });
        record.settings = settings.clone();
        f(record);
        record.updated_at = now;
        self.store(&records).await
    }
}

#[async_trait]
impl RunLifecycleRecorder for JsonRunRecorder {
    async fn record_start(&self, run_id: &str, settings: &RunSettings) -> WorkflowResult<()> {
        self.modify(run_id, settings, |record| {
            record.status = RecordStatus::Running;
            record.solve_started_at = Some(Utc::now());
            record.solve_completed_at = None;
            record.solve_duration_seconds = None;
            record.success = None;
        })
        .await
    }

    async fn record_completion(
        &self,
        run_id: &str,
        settings: &RunSettings,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: RunStatus,
    ) -> WorkflowResult<()> {
        self.modify(run_id, settings, move |record| {
            record.status = status.into();
            record.solve_started_at = Some(started_at);
            record.solve_completed_at = Some(completed_at);
            record.solve_duration_seconds =
                Some((completed_at - started_at).num_milliseconds() as f64 / 1000.0);
            record.success = Some(status == RunStatus::Success);
        })
        .await
    }
}
