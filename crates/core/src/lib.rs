//! # wf-core
//!
//! Simulation workflow orchestration for windflow.
//!
//! This crate turns a declared sequence of toolkit stages into a supervised,
//! observable, cancellable run:
//! - External commands run under a shell with the toolkit environment sourced
//! - Every output line is persisted and fanned out to live subscribers
//! - Run state, progress and ETA are tracked per run id
//! - A stop request terminates the active process group
//!
//! ## Modules
//!
//! - [`config`]: Process-wide configuration loading
//! - [`exec`]: ProcessRunner and line sinks
//! - [`broadcast`]: LogBroadcaster with durable transcripts and replay
//! - [`state`]: JobRegistry and the Orchestrator
//! - [`engine`]: StagePipeline and the stage abstraction
//! - [`stages`]: The toolkit stage library and pipeline variants
//! - [`configurator`]: CaseConfigurator, a key-path dictionary editor
//! - [`recorder`]: RunLifecycleRecorder and its JSON store

pub mod broadcast;
pub mod config;
pub mod configurator;
pub mod engine;
pub mod error;
pub mod exec;
pub mod recorder;
pub mod stages;
pub mod state;

pub use error::{WorkflowError, WorkflowResult};
pub use state::manager::{generate_run_id, validate_run_id, Orchestrator, StartRequest};
