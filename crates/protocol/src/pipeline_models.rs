//! Pipeline variant models.
//!
//! A pipeline variant names an ordered stage table. The tables themselves
//! are built by the core crate; only the selector travels over the wire.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ts_rs::TS;

/// The named pipeline variants a run can execute.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Mesh import and merge only. Safe to repeat: imports are skipped
    /// when the converted mesh already exists.
    Mesh,

    /// Zone setup, mesh check, settings, solve and post-analysis on an
    /// existing mesh.
    Solve,

    /// Mesh creation followed by the full solve.
    Full,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Solve => "solve",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "solve" => Ok(Self::Solve),
            "full" => Ok(Self::Full),
            other => Err(format!(
                "unknown pipeline '{other}' (expected mesh, solve or full)"
            )),
        }
    }
}
