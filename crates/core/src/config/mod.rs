//! Configuration loading and management.
//!
//! Process-wide settings live in a single `windflow.toml` file; per-run
//! settings are carried by [`wf_protocol::RunSettings`].

pub mod error;
pub mod loader;
pub mod models;
