//! Stop requests against a real long-running process.
//!
//! Only `bash`, `echo` and `sleep` are used.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wf_core::broadcast::LogBroadcaster;
use wf_core::engine::{Stage, StagePipeline};
use wf_core::exec::{RunLogSink, ShellProcessRunner};
use wf_core::state::registry::JobRegistry;
use wf_protocol::{LogEvent, RunStatus};

async fn wait_for_process(registry: &JobRegistry, run_id: &str) -> (u32, String) {
    for _ in 0..500 {
        if let Some(active) = registry.active_process(run_id).await {
            return active;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("process for {run_id} was never registered");
}

#[tokio::test]
async fn test_cancel_mid_stage_stops_run() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = JobRegistry::new();
    registry.create("r4").await;
    let broadcaster = Arc::new(LogBroadcaster::new(dir.path().join("logs"), 50));
    let (_sub, mut rx) = broadcaster.subscribe("r4").await;
    let runner = Arc::new(
        ShellProcessRunner::new("/bin/bash", registry.clone())
            .with_stop_grace(Duration::from_secs(1)),
    );
    let ctx = stage_context(
        "r4",
        dir.path(),
        runner,
        Arc::new(RunLogSink::new(Arc::clone(&broadcaster), "r4")),
    );
    let stages = vec![
        Stage::new("prepare", ScriptedStage::succeeding(&["prepared"])),
        Stage::new(
            "solve",
            CommandStage {
                command_line: "echo started; sleep 30".into(),
            },
        ),
        Stage::new("analyse", ScriptedStage::succeeding(&["analysed"])),
    ];
    let pipeline = StagePipeline::new(registry.clone(), Arc::clone(&broadcaster), SpyRecorder::new());

    let task = tokio::spawn(async move { pipeline.run("r4", &stages, &ctx).await });

    let (_pid, stage) = wait_for_process(&registry, "r4").await;
    assert_eq!(stage, "command");
    assert!(registry.cancel("r4").await);

    let run = tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .expect("pipeline ends after stop")
        .expect("pipeline task completes");

    assert_eq!(run.status, RunStatus::Stopped);
    assert_eq!(run.current_stage, "solve");
    assert!(run.error.is_none());
    assert!(registry.active_process("r4").await.is_none());
    assert!(!registry.cancel("r4").await);

    let events = drain(&mut rx);
    let lines = log_lines(&events);
    assert!(lines.contains(&"started".to_string()));
    assert!(lines.contains(&"[solve] Stopped by user".to_string()));
    assert!(!lines.contains(&"analysed".to_string()));
    assert!(!events.iter().any(|e| matches!(e, LogEvent::Error { .. })));

    // The stage transcript kept everything up to the kill.
    let transcript = std::fs::read_to_string(dir.path().join("stage-logs/command.log"))
        .expect("stage transcript");
    assert!(transcript.contains("# Command: echo started; sleep 30"));
    assert!(transcript.contains("started"));
}

#[tokio::test]
async fn test_failing_process_is_failure_not_stop() {
    let dir = tempdir().expect("Failed to create temp dir");
    let registry = JobRegistry::new();
    registry.create("r5").await;
    let broadcaster = Arc::new(LogBroadcaster::new(dir.path().join("logs"), 50));
    let runner = Arc::new(ShellProcessRunner::new("/bin/bash", registry.clone()));
    let ctx = stage_context(
        "r5",
        dir.path(),
        runner,
        Arc::new(RunLogSink::new(Arc::clone(&broadcaster), "r5")),
    );
    let stages = vec![Stage::new(
        "solve",
        CommandStage {
            command_line: "echo diverged; exit 3".into(),
        },
    )];
    let pipeline = StagePipeline::new(registry.clone(), broadcaster, SpyRecorder::new());

    let run = pipeline.run("r5", &stages, &ctx).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error.as_deref(),
        Some("command failed (exit code: 3): diverged")
    );
    assert!(registry.active_process("r5").await.is_none());
}
