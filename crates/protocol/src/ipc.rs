//! Live log subscriber protocol.
//!
//! This module defines the text frames exchanged over a per-run duplex
//! connection between the server and a browser log viewer.
//!
//! The protocol is asymmetric:
//! - `LogEvent`: tagged JSON records sent from the server to subscribers
//! - `ClientMessage`: plain text sent from a subscriber to the server
//!
//! Events for one run are delivered in production order. There is no
//! ordering guarantee across runs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Line sent to a newly attached subscriber once history replay is done.
pub const REPLAY_COMPLETE_LINE: &str = "[Connected - showing recent log history above]";

/// Events sent from the server to log subscribers.
///
/// Uses internally tagged serialization:
/// ```json
/// {"type":"progress","step":"Running solver","progress":50,"stepNum":3,"totalSteps":5}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogEvent {
    /// One line of output, from an external process or an in-process stage.
    Log { line: String },

    /// A stage is about to start.
    Progress {
        /// Name of the stage.
        step: String,
        /// Overall completion percentage.
        progress: u8,
        /// One-based stage index.
        #[serde(rename = "stepNum")]
        step_num: usize,
        #[serde(rename = "totalSteps")]
        total_steps: usize,
    },

    /// A stage failed and the run is halting.
    Error { step: String, message: String },

    /// The run finished successfully.
    Complete { message: String },

    /// Reply to a client `ping`.
    Pong,
}

impl LogEvent {
    pub fn log(line: impl Into<String>) -> Self {
        Self::Log { line: line.into() }
    }

    /// Serialize into a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame produced by [`LogEvent::to_frame`].
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Messages received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Application-level keepalive; answered with [`LogEvent::Pong`].
    Ping,

    /// Anything else. Ignored by the server.
    Other(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Self {
        if text.trim() == "ping" {
            Self::Ping
        } else {
            Self::Other(text.to_string())
        }
    }
}
