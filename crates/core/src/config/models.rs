//! Process-wide configuration model.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// Settings loaded from `windflow.toml`.
///
/// Every field has a default, so an absent or empty file yields a usable
/// configuration.
///
/// # Example
///
/// ```toml
/// toolkit_env = "/opt/openfoam/etc/bashrc"
/// runs_dir = "/srv/windflow/runs"
/// replay_lines = 100
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Environment script sourced before every external command.
    /// Empty disables sourcing.
    pub toolkit_env: String,

    /// Interpreter that receives each command line via `-c`.
    pub shell: PathBuf,

    /// Root holding one working directory per run (stage transcripts).
    pub runs_dir: PathBuf,

    /// Durable per-run transcripts, `<run_id>.log`.
    pub logs_dir: PathBuf,

    /// Directory of the run record store.
    pub metadata_dir: PathBuf,

    /// History lines replayed to a newly attached subscriber.
    pub replay_lines: usize,

    /// Output lines kept by the runner for failure diagnostics.
    pub tail_lines: usize,

    /// Output marker that fails a tolerant diagnostic stage.
    pub fatal_marker: String,

    /// Seconds a stopped process group gets between SIGTERM and SIGKILL.
    pub stop_grace_seconds: u64,

    /// Age after which terminal runs are evicted by housekeeping.
    pub retention_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            toolkit_env: "/usr/lib/openfoam/openfoam2506/etc/bashrc".to_string(),
            shell: PathBuf::from("/bin/bash"),
            runs_dir: PathBuf::from("runs"),
            logs_dir: PathBuf::from("logs"),
            metadata_dir: PathBuf::from("metadata"),
            replay_lines: 50,
            tail_lines: 50,
            fatal_marker: "FOAM FATAL ERROR".to_string(),
            stop_grace_seconds: 5,
            retention_hours: 24,
        }
    }
}

impl AppConfig {
    /// Environment script, if sourcing is enabled.
    pub fn toolkit_env(&self) -> Option<&Path> {
        if self.toolkit_env.trim().is_empty() {
            None
        } else {
            Some(Path::new(&self.toolkit_env))
        }
    }

    /// Resolve relative directories against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for dir in [
            &mut self.runs_dir,
            &mut self.logs_dir,
            &mut self.metadata_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }

    /// Working directory of one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Per-stage transcripts of one run.
    pub fn stage_logs_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("logs")
    }
}
