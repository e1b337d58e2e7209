//! Live state of every run known to this process.

use crate::error::{WorkflowError, WorkflowResult};
use crate::state::process::{apply_update, ProcessHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use wf_protocol::{Run, RunStatus, RunUpdate};

struct RunEntry {
    run: Run,
    process: Option<ProcessHandle>,
    stop_requested: bool,
}

/// Registry of runs and the cancellation handles of their active processes.
///
/// Cloning is cheap: clones share the same table. Each run only ever touches
/// its own key, so one lock over the table is enough.
#[derive(Clone, Default)]
pub struct JobRegistry {
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `queued` run, or return the existing record unchanged.
    pub async fn create(&self, run_id: &str) -> Run {
        let mut runs = self.runs.lock().await;
        runs.entry(run_id.to_string())
            .or_insert_with(|| RunEntry {
                run: Run::new(run_id),
                process: None,
                stop_requested: false,
            })
            .run
            .clone()
    }

    /// Reserve `run_id` for a new pipeline.
    ///
    /// Check and insert happen under one lock, so of two concurrent callers
    /// only one gets the reservation. A terminal run with the same id is
    /// replaced and returned alongside the fresh record.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::RunActive`] if the id belongs to a run that has not
    /// finished.
    pub async fn try_create(&self, run_id: &str) -> WorkflowResult<(Run, Option<Run>)> {
        let mut runs = self.runs.lock().await;
        if runs
            .get(run_id)
            .is_some_and(|entry| !entry.run.status.is_terminal())
        {
            return Err(WorkflowError::RunActive(run_id.to_string()));
        }
        let run = Run::new(run_id);
        let replaced = runs
            .insert(
                run_id.to_string(),
                RunEntry {
                    run: run.clone(),
                    process: None,
                    stop_requested: false,
                },
            )
            .map(|entry| entry.run);
        Ok((run, replaced))
    }

    /// Merge the supplied fields into a run.
    ///
    /// Returns the updated record, or `None` for an unknown run.
    pub async fn update(&self, run_id: &str, update: RunUpdate) -> Option<Run> {
        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(run_id)?;
        apply_update(&mut entry.run, update, Utc::now());
        Some(entry.run.clone())
    }

    pub async fn get(&self, run_id: &str) -> Option<Run> {
        let runs = self.runs.lock().await;
        runs.get(run_id).map(|entry| entry.run.clone())
    }

    /// All runs, newest first, optionally restricted to one status.
    pub async fn list(&self, status: Option<RunStatus>) -> Vec<Run> {
        let runs = self.runs.lock().await;
        let mut result: Vec<Run> = runs
            .values()
            .filter(|entry| status.map_or(true, |s| entry.run.status == s))
            .map(|entry| entry.run.clone())
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Attach the handle of a freshly spawned process to its run.
    ///
    /// Refused, with the handle returned, when a stop was already requested
    /// for the run; the caller must then terminate the process itself. A
    /// process for an unknown run is not tracked.
    pub async fn register_process(
        &self,
        run_id: &str,
        handle: ProcessHandle,
    ) -> Result<(), ProcessHandle> {
        let mut runs = self.runs.lock().await;
        match runs.get_mut(run_id) {
            Some(entry) if entry.stop_requested => Err(handle),
            Some(entry) => {
                entry.process = Some(handle);
                Ok(())
            }
            None => {
                tracing::debug!(run_id, pid = handle.pid, "process for unknown run not tracked");
                Ok(())
            }
        }
    }

    /// Drop the handle of an exited process.
    ///
    /// Only removes the handle if it still belongs to `pid`.
    pub async fn release_process(&self, run_id: &str, pid: u32) {
        let mut runs = self.runs.lock().await;
        if let Some(entry) = runs.get_mut(run_id) {
            if entry.process.as_ref().is_some_and(|h| h.pid == pid) {
                entry.process = None;
            }
        }
    }

    /// Pid and stage of the run's active process, if any.
    pub async fn active_process(&self, run_id: &str) -> Option<(u32, String)> {
        let runs = self.runs.lock().await;
        runs.get(run_id)
            .and_then(|entry| entry.process.as_ref())
            .map(|h| (h.pid, h.stage.clone()))
    }

    /// Request a stop.
    ///
    /// Marks a non-terminal run as stop-requested. If a process is registered
    /// it is signalled, its handle is removed, and `true` is returned. `false`
    /// means there was nothing to terminate.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let mut runs = self.runs.lock().await;
        let Some(entry) = runs.get_mut(run_id) else {
            return false;
        };
        if !entry.run.status.is_terminal() {
            entry.stop_requested = true;
        }
        match entry.process.take() {
            Some(handle) => {
                tracing::info!(run_id, pid = handle.pid, stage = %handle.stage, "terminating process");
                handle.terminate();
                true
            }
            None => false,
        }
    }

    pub async fn is_stop_requested(&self, run_id: &str) -> bool {
        let runs = self.runs.lock().await;
        runs.get(run_id).is_some_and(|entry| entry.stop_requested)
    }

    /// Remove a terminal run.
    pub async fn evict(&self, run_id: &str) -> WorkflowResult<Run> {
        let mut runs = self.runs.lock().await;
        let terminal = runs
            .get(run_id)
            .map(|entry| entry.run.status.is_terminal())
            .ok_or_else(|| WorkflowError::UnknownRun(run_id.to_string()))?;
        if !terminal {
            return Err(WorkflowError::RunNotFinished(run_id.to_string()));
        }
        runs.remove(run_id)
            .map(|entry| entry.run)
            .ok_or_else(|| WorkflowError::UnknownRun(run_id.to_string()))
    }

    /// Remove every terminal run that completed before `cutoff`.
    ///
    /// Returns the evicted run ids.
    pub async fn evict_completed_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut runs = self.runs.lock().await;
        let expired: Vec<String> = runs
            .iter()
            .filter(|(_, entry)| {
                entry.run.status.is_terminal()
                    && entry.run.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            runs.remove(id);
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}
