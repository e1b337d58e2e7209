//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality across the integration tests:
//! - Fixtures (configuration, case directories, scripted stages)
//! - Spy collaborators (process runner, lifecycle recorder)
//! - Assertions over received event frames

pub mod assertions;
pub mod fixtures;
pub mod spies;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use spies::*;
