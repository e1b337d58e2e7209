//! Helpers for inspecting the frames a subscriber received.

use tokio::sync::mpsc::UnboundedReceiver;
use wf_protocol::LogEvent;

/// Parse every frame currently queued on `rx`.
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        events.push(LogEvent::from_frame(&frame).expect("valid frame"));
    }
    events
}

/// Text of every `log` event, in order.
#[allow(dead_code)]
pub fn log_lines(events: &[LogEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            LogEvent::Log { line } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

/// Percentages of every `progress` event, in order.
#[allow(dead_code)]
pub fn progress_values(events: &[LogEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            LogEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

/// Position of the first event matching `pred`.
#[allow(dead_code)]
pub fn position(events: &[LogEvent], pred: impl Fn(&LogEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}
