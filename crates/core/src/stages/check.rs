//! Mesh quality check.

use super::log_name;
use crate::engine::{StageContext, StageOutcome, StageStep};
use crate::exec::CommandOutput;
use async_trait::async_trait;

/// Full geometry and topology check.
pub const CHECK_MESH_COMMAND: &str = "checkMesh -allGeometry -allTopology";

const CELLS_PREFIX: &str = "cells:";

/// Runs `checkMesh` in the solve directory.
///
/// `checkMesh` exits non-zero for quality warnings that do not prevent a
/// solve, so this stage judges the run with [`judge`] instead of the exit
/// code alone.
pub struct CheckMesh {
    seq: usize,
}

impl CheckMesh {
    pub fn new(seq: usize) -> Self {
        Self { seq }
    }
}

#[async_trait]
impl StageStep for CheckMesh {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let request = ctx
            .command(
                "checkMesh",
                CHECK_MESH_COMMAND,
                &ctx.solve_dir(),
                &log_name(self.seq, "checkMesh"),
            )
            .watch(ctx.fatal_marker.as_str())
            .capture(CELLS_PREFIX);
        let output = ctx.execute(&request).await;
        Ok(judge(&output, &ctx.fatal_marker))
    }
}

/// Tolerant verdict for diagnostic commands.
///
/// A command that could not start or was stopped fails. Otherwise the
/// fatal marker decides: present means failure whatever the exit code,
/// absent means success even on a non-zero exit.
pub fn judge(output: &CommandOutput, fatal_marker: &str) -> StageOutcome {
    if output.spawn_error.is_some() || output.cancelled {
        return StageOutcome::failure(output.failure_message("checkMesh"));
    }
    if output.saw(fatal_marker) {
        return StageOutcome::failure(format!(
            "checkMesh reported '{fatal_marker}'; see the mesh check log"
        ));
    }
    let cells = cell_count(output).unwrap_or_else(|| "unknown".to_string());
    match output.exit_code {
        Some(0) => StageOutcome::success(format!("Mesh check passed: {cells} cells")),
        Some(code) => StageOutcome::success(format!(
            "Mesh check finished with warnings: {cells} cells (exit code: {code})"
        )),
        None => StageOutcome::success(format!("Mesh check finished with warnings: {cells} cells")),
    }
}

/// Cell count from the `cells:` line of the mesh statistics.
fn cell_count(output: &CommandOutput) -> Option<String> {
    output
        .captured(CELLS_PREFIX)?
        .split_whitespace()
        .next()
        .filter(|n| n.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}
