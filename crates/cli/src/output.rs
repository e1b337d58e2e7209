//! Terminal rendering of live events, run summaries and recorded runs.

use colored::Colorize;
use wf_core::recorder::{RecordStatus, RunRecord};
use wf_protocol::{LogEvent, Run, RunStatus};

/// Render one subscriber frame. Returns `None` for frames with nothing to show.
pub fn render_frame(frame: &str) -> Option<String> {
    match LogEvent::from_frame(frame) {
        Ok(event) => render_event(&event),
        Err(_) => Some(frame.to_string()),
    }
}

pub fn render_event(event: &LogEvent) -> Option<String> {
    match event {
        LogEvent::Log { line } => Some(line.clone()),
        LogEvent::Progress {
            step,
            progress,
            step_num,
            total_steps,
        } => Some(
            format!("==> [{step_num}/{total_steps}] {step} ({progress}%)")
                .cyan()
                .bold()
                .to_string(),
        ),
        LogEvent::Error { step, message } => {
            Some(format!("[{step}] {message}").red().bold().to_string())
        }
        LogEvent::Complete { message } => Some(message.green().bold().to_string()),
        LogEvent::Pong => None,
    }
}

fn paint_status(status: RunStatus) -> String {
    let text = status.as_str();
    match status {
        RunStatus::Success => text.green().to_string(),
        RunStatus::Failed => text.red().to_string(),
        RunStatus::Stopped => text.yellow().to_string(),
        RunStatus::Queued | RunStatus::Running => text.normal().to_string(),
    }
}

/// Multi-line summary printed once a run reaches a terminal state.
pub fn run_summary(run: &Run) -> String {
    let mut out = format!("Run {}: {}", run.run_id.bold(), paint_status(run.status));
    if !run.current_stage.is_empty() {
        out.push_str(&format!("\n  stage:    {}", run.current_stage));
    }
    out.push_str(&format!("\n  progress: {}%", run.progress));
    if let Some(duration) = run.duration_seconds() {
        out.push_str(&format!("\n  duration: {duration:.1}s"));
    }
    if let Some(error) = &run.error {
        out.push_str(&format!("\n  error:    {}", error.red()));
    }
    out
}

fn record_status(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Running => "running",
        RecordStatus::Completed => "completed",
        RecordStatus::Failed => "failed",
        RecordStatus::Stopped => "stopped",
    }
}

/// Table of recorded runs, one per line, or a notice when there are none.
pub fn runs_table(records: &[RunRecord]) -> String {
    if records.is_empty() {
        return "No runs recorded".to_string();
    }
    let mut out = format!(
        "{:<40} {:<10} {:<12} {:>10}",
        "RUN", "STATUS", "SOLVER", "DURATION"
    );
    for record in records {
        let duration = record
            .solve_duration_seconds
            .map(|d| format!("{d:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "\n{:<40} {:<10} {:<12} {:>10}",
            record.run_id,
            record_status(record.status),
            record.settings.solver.solver,
            duration
        ));
    }
    out
}
