//! Line sinks receive every line a stage produces, in production order.

use crate::broadcast::LogBroadcaster;
use async_trait::async_trait;
use std::sync::Arc;
use wf_protocol::LogEvent;

/// Receiver of produced output lines.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn line(&self, line: &str);
}

/// Forwards lines to a run's subscribers as `log` events.
pub struct RunLogSink {
    broadcaster: Arc<LogBroadcaster>,
    run_id: String,
}

impl RunLogSink {
    pub fn new(broadcaster: Arc<LogBroadcaster>, run_id: impl Into<String>) -> Self {
        Self {
            broadcaster,
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl LineSink for RunLogSink {
    async fn line(&self, line: &str) {
        self.broadcaster
            .broadcast(&self.run_id, &LogEvent::log(line))
            .await;
    }
}

/// Discards every line.
pub struct NullSink;

#[async_trait]
impl LineSink for NullSink {
    async fn line(&self, _line: &str) {}
}
