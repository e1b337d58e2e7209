//! # wf-protocol
//!
//! Run models and live log protocol for windflow.
//!
//! This crate defines all shared data structures used for:
//! - Run state as reported by the job registry (status, progress, ETA)
//! - Per-run settings handed to the simulation pipeline
//! - The tagged JSON frames streamed to browser log subscribers
//!
//! ## Modules
//!
//! - [`run_models`]: Run lifecycle state and partial updates
//! - [`config_models`]: Solver, material, analysis and mesh layout settings
//! - [`pipeline_models`]: Named pipeline variants
//! - [`ipc`]: Server-to-subscriber events and client messages
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, chrono and ts-rs
//! - TypeScript generation: Wire types derive `TS` for the browser client
//! - Independent compilation: No dependencies on other windflow crates

pub mod config_models;
pub mod ipc;
pub mod pipeline_models;
pub mod run_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use ipc::*;
pub use pipeline_models::*;
pub use run_models::*;
