//! Spy collaborators that record how they were called.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use wf_core::exec::{CommandOutput, CommandRequest, LineSink, ProcessRunner};
use wf_core::recorder::RunLifecycleRecorder;
use wf_core::WorkflowResult;
use wf_protocol::{RunSettings, RunStatus};

/// Process runner that never spawns anything.
///
/// Each request is recorded; every command "exits" zero after sending
/// one line to the sink.
#[derive(Default)]
pub struct SpyRunner {
    requests: Mutex<Vec<CommandRequest>>,
}

#[allow(dead_code)]
impl SpyRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invocations(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|r| r.command_line.clone())
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for SpyRunner {
    async fn run(&self, request: &CommandRequest, sink: &dyn LineSink) -> CommandOutput {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        sink.line(&format!("spy: {}", request.command_line)).await;
        CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderCall {
    Start(String),
    Completion(String, RunStatus),
}

/// Lifecycle recorder keeping its calls in memory.
#[derive(Default)]
pub struct SpyRecorder {
    calls: Mutex<Vec<RecorderCall>>,
}

#[allow(dead_code)]
impl SpyRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl RunLifecycleRecorder for SpyRecorder {
    async fn record_start(&self, run_id: &str, _settings: &RunSettings) -> WorkflowResult<()> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(RecorderCall::Start(run_id.to_string()));
        Ok(())
    }

    async fn record_completion(
        &self,
        run_id: &str,
        _settings: &RunSettings,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: RunStatus,
    ) -> WorkflowResult<()> {
        assert!(started_at <= completed_at);
        self.calls
            .lock()
            .expect("calls lock")
            .push(RecorderCall::Completion(run_id.to_string(), status));
        Ok(())
    }
}
