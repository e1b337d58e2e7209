//! External process execution.
//!
//! - [`runner`]: the [`ProcessRunner`] seam and its shell-backed implementation
//! - [`sink`]: where produced lines go

pub mod runner;
pub mod sink;

pub use runner::{CommandOutput, CommandRequest, ProcessRunner, ShellProcessRunner};
pub use sink::{LineSink, NullSink, RunLogSink};
