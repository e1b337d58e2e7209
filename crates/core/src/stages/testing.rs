//! Scripted collaborators for stage unit tests.

use crate::engine::StageContext;
use crate::exec::{CommandOutput, CommandRequest, LineSink, NullSink, ProcessRunner};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wf_protocol::RunSettings;

/// Records every request and answers from a script, defaulting to exit 0.
#[derive(Default)]
pub struct ScriptedRunner {
    pub requests: Mutex<Vec<CommandRequest>>,
    script: Mutex<VecDeque<CommandOutput>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn then(self: &Arc<Self>, output: CommandOutput) -> Arc<Self> {
        self.script.lock().expect("script lock").push_back(output);
        Arc::clone(self)
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
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, request: &CommandRequest, _sink: &dyn LineSink) -> CommandOutput {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| exited(0, &[]))
    }
}

pub fn exited(code: i32, lines: &[&str]) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        tail: lines.iter().map(|l| l.to_string()).collect(),
        ..CommandOutput::default()
    }
}

pub fn context(case_dir: &Path, settings: RunSettings, runner: Arc<ScriptedRunner>) -> StageContext {
    StageContext {
        run_id: "test-run".to_string(),
        case_dir: case_dir.to_path_buf(),
        logs_dir: case_dir.join("logs"),
        settings: Arc::new(settings),
        runner,
        sink: Arc::new(NullSink),
        fatal_marker: "FOAM FATAL ERROR".to_string(),
    }
}

/// Write a minimal converted mesh under `dir/constant/polyMesh`.
pub fn write_poly_mesh(dir: &Path) {
    let poly = dir.join("constant").join("polyMesh");
    std::fs::create_dir_all(&poly).expect("polyMesh dir");
    for name in ["points", "faces", "owner", "boundary"] {
        std::fs::write(poly.join(name), format!("{name}\n")).expect("mesh file");
    }
}
