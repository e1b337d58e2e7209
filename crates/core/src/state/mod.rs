//! Run state management.
//!
//! This module provides:
//! - Run state transitions and process handles ([`process`])
//! - The shared table of live runs ([`registry`])
//! - The Orchestrator that starts and supervises runs ([`manager`])

pub mod manager;
pub mod process;
pub mod registry;
